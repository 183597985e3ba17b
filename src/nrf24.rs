//! nRF24 implementations.

use crate::address::AccessAddress;
use crate::config::{
    AddressWidth, AutoRetransmission, DataPipe, DataRate, EncodingScheme, NrfConfig, PALevel,
    PayloadSize,
};
use crate::error::TransferError;
use crate::radio::{Ack, Radio};
use crate::register_acces::{Instruction, Register};
use crate::status::{FIFOStatus, Status};
use crate::MAX_PAYLOAD_SIZE;
use core::fmt;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiDevice;

/// The nRF24L01 driver type. This struct encapsulates all functionality.
///
/// For the different configuration options see: [`NrfConfig`].
///
/// # Examples
/// ```ignore
/// use nrf24_link::Nrf24l01;
/// use nrf24_link::config::NrfConfig;
///
/// // Initialize the chip with default configuration.
/// let nrf24 = Nrf24l01::new(spi, ce, delay, NrfConfig::default()).unwrap();
///
/// ```
pub struct Nrf24l01<SPI, CE, D> {
    spi: SPI,
    // Chip Enable Pin
    ce: CE,
    delay: D,
    // Config Register
    config_reg: u8,
    // Payload size
    payload_size: PayloadSize,
    auto_retry: AutoRetransmission,
    // Addresses of the open reading pipes
    pipe_addresses: [Option<AccessAddress>; 6],
    // Next payload goes out without requesting an acknowledgement
    no_ack: bool,
    // Transmission buffer
    tx_buf: [u8; MAX_PAYLOAD_SIZE as usize + 1],
}

impl<SPI, CE, D, SPIErr, PinErr> Nrf24l01<SPI, CE, D>
where
    SPI: SpiDevice<u8, Error = SPIErr>,
    CE: OutputPin<Error = PinErr>,
    D: DelayNs,
{
    const MAX_ADDR_WIDTH: usize = 5;
    const STATUS_RESET: u8 = 0b01110000;
    const ACK_POLL_INTERVAL_US: u32 = 50;
    // FEATURE: EN_DPL | EN_DYN_ACK
    const FEATURE_DYNAMIC: u8 = 0b0000_0101;

    /// Creates a new nrf24l01 driver with given config.
    /// Starts up the device after initialization, so calling [`power_up()`](#method.power_up) is not necessary.
    ///
    /// # Examples
    /// ```ignore
    /// // SPI device and CE pin come from the HAL of your board
    /// let spi = ExclusiveDevice::new(spi_bus, ncs, delay.clone())?;
    /// let ce = pins.d3.into_push_pull_output();
    ///
    /// // Construct a new instance of the chip with a default configuration
    /// // This will initialize the module and start it up
    /// let nrf24 = nrf24_link::Nrf24l01::new(spi, ce, delay, NrfConfig::default())?;
    /// ```
    pub fn new(
        spi: SPI,
        ce: CE,
        delay: D,
        config: NrfConfig,
    ) -> Result<Self, TransferError<SPIErr, PinErr>> {
        let mut chip = Self::with_parts(spi, ce, delay);

        // Set the output pins to the correct levels
        chip.set_ce_low()?;

        // Must allow the radio time to settle else configuration bits will not necessarily stick.
        // This is actually only required following power up but some settling time also appears to
        // be required after resets too. For full coverage, we'll always assume the worst.
        // Technically we require 4.5ms + 14us as a worst case. We'll just call it 5ms for good measure.
        chip.delay.delay_ms(5);

        // Set retries
        chip.set_retries(config.auto_retry)?;
        // Set rf
        chip.setup_rf(config.data_rate, config.pa_level)?;
        // Set payload size
        chip.set_payload_size(config.payload_size)?;
        // Set address length
        chip.set_address_width(config.addr_width)?;
        // Reset status
        chip.reset_status()?;
        chip.set_channel(config.channel)?;
        // flush buffers
        chip.flush_rx()?;
        chip.flush_tx()?;

        // clear CONFIG register, Enable PTX, Power Up & CRC
        let mut expected = 1 << 1;
        if let Some(encoding_scheme) = config.crc_encoding_scheme {
            chip.enable_crc(encoding_scheme)?;
            expected |= (1 << 3) | (encoding_scheme.scheme() << 2);
        }

        chip.config_reg = chip.read_register(Register::CONFIG)?;

        chip.power_up()?;

        if chip.config_reg != expected {
            Err(TransferError::CommunicationError(chip.config_reg))
        } else {
            Ok(chip)
        }
    }

    fn with_parts(spi: SPI, ce: CE, delay: D) -> Self {
        Nrf24l01 {
            spi,
            ce,
            delay,
            config_reg: 0,
            payload_size: PayloadSize::Dynamic,
            auto_retry: AutoRetransmission::default(),
            pipe_addresses: [None; 6],
            no_ack: false,
            tx_buf: [0; MAX_PAYLOAD_SIZE as usize + 1],
        }
    }

    /// Checks if the chip is connected to the SPI bus.
    /// # Examples
    /// ```ignore
    /// if !chip.is_connected()? {
    ///     // Handle disconnection
    /// }
    /// ```
    pub fn is_connected(&mut self) -> Result<bool, TransferError<SPIErr, PinErr>> {
        let setup = self.read_register(Register::SETUP_AW)?;
        Ok((1..=3).contains(&setup))
    }

    /// Opens a reading pipe for reading data on an address.
    ///
    /// # Examples
    /// ```ignore
    /// chip.open_reading_pipe(DataPipe::DP0, b"Node1")?;
    /// ```
    ///
    /// `pipe` can either be an instance of the type [`DataPipe`] or an integer.
    /// Note that if an integer is provided, numbers higher than 5 will default to reading pipe 0.
    ///
    /// Pipes 2-5 only take the first (least significant) byte of `addr`; the other four are
    /// shared with pipe 1.
    ///
    /// # Warnings
    /// You have to call this before calling [`start_listening()`](#method.start_listening).
    pub fn open_reading_pipe<T: Into<DataPipe>>(
        &mut self,
        pipe: T,
        mut addr: &[u8],
    ) -> Result<(), TransferError<SPIErr, PinErr>> {
        let pipe = pipe.into();
        if addr.len() > Self::MAX_ADDR_WIDTH {
            addr = &addr[0..Self::MAX_ADDR_WIDTH];
        }

        // Get the memory map address corresponding to the data pipe.
        let rx_address_reg = Register::rx_addr(pipe);
        match pipe {
            DataPipe::DP0 | DataPipe::DP1 => self.write_register(rx_address_reg, addr)?,
            _ => self.write_register(rx_address_reg, addr[0])?,
        }

        // Enable corresponding RX Addr
        let old_reg = self.read_register(Register::EN_RXADDR)?; // Read old value
        self.write_register(Register::EN_RXADDR, old_reg | (1 << pipe.pipe()))?; // Update

        Ok(())
    }

    /// Stops receiving on a pipe.
    pub fn close_reading_pipe<T: Into<DataPipe>>(
        &mut self,
        pipe: T,
    ) -> Result<(), TransferError<SPIErr, PinErr>> {
        let pipe = pipe.into();
        let old_reg = self.read_register(Register::EN_RXADDR)?;
        self.write_register(Register::EN_RXADDR, old_reg & !(1 << pipe.pipe()))
    }

    /// Opens a writing pipe for writing data to an address.
    /// # Examples
    /// ```ignore
    /// // Open writing pipe for address "Node1"
    /// chip.open_writing_pipe(b"Node1")?;
    /// ```
    /// # Warnings
    /// Must be called before writing data.
    pub fn open_writing_pipe(
        &mut self,
        mut addr: &[u8],
    ) -> Result<(), TransferError<SPIErr, PinErr>> {
        if addr.len() > Self::MAX_ADDR_WIDTH {
            addr = &addr[0..Self::MAX_ADDR_WIDTH];
        }
        // We need to open Reading Pipe 0 with the same address name
        // because ACK messages will be recieved on this channel
        self.write_register(Register::RX_ADDR_P0, addr)?;
        // Open writing pipe
        self.write_register(Register::TX_ADDR, addr)?;

        Ok(())
    }

    /// Starts listening on the pipes that are opened for reading.
    /// Used in Receiver Mode.
    ///
    /// # Warnings
    /// Make sure at least one pipe is opened for reading using the [`open_reading_pipe()`](#method.open_reading_pipe) method.
    pub fn start_listening(&mut self) -> Result<(), TransferError<SPIErr, PinErr>> {
        // Enable RX listening flag
        self.config_reg |= 1;
        self.write_register(Register::CONFIG, self.config_reg)?;
        // Flush interrupts
        self.reset_status()?;

        self.set_ce_high()?;

        Ok(())
    }

    /// Stops listening.
    pub fn stop_listening(&mut self) -> Result<(), TransferError<SPIErr, PinErr>> {
        self.set_ce_low()?;

        self.config_reg &= !0b1;
        self.write_register(Register::CONFIG, self.config_reg)?;

        Ok(())
    }

    /// Checks if there are any bytes available to be read.
    pub fn data_available(&mut self) -> Result<bool, TransferError<SPIErr, PinErr>> {
        Ok(self.data_available_on_pipe()?.is_some())
    }

    /// Returns the data pipe where the data is available and `None` if no data available.
    ///
    /// # Examples
    /// ```ignore
    /// // Chip has to be set in listening mode first
    /// chip.open_reading_pipe(DataPipe::DP1, b"Node1")?;
    /// chip.start_listening()?;
    /// // Check if there is any data to read on pipe 1
    /// while let Some(pipe) = chip.data_available_on_pipe()? {
    ///     if pipe == DataPipe::DP1 {
    ///         // ... read the payload
    ///     }
    /// }
    /// ```
    pub fn data_available_on_pipe(
        &mut self,
    ) -> Result<Option<DataPipe>, TransferError<SPIErr, PinErr>> {
        Ok(self.status()?.data_pipe_available())
    }

    /// Reads the available payload. To check if there are any payloads available, call
    /// [`data_available()`](#method.data_available).
    ///
    /// Returns the number of bytes read into the buffer. With dynamic payloads this is the
    /// length the sender wrote, capped by the length of `buf`.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransferError<SPIErr, PinErr>> {
        let width = match self.payload_size {
            PayloadSize::Static(n) => n as usize,
            PayloadSize::Dynamic => {
                self.tx_buf[..2].copy_from_slice(&[Instruction::RRX_PL_WID.opcode(), 0]);
                let width = self.spi_transfer_tx_buf(1)?[1];
                if width > MAX_PAYLOAD_SIZE {
                    // Corrupted payload, the datasheet asks to drop it
                    self.flush_rx()?;
                    return Err(TransferError::CommunicationError(width));
                }
                width as usize
            }
        };

        // Use tx buffer to copy the values into
        // First byte will be the opcode
        self.tx_buf[0] = Instruction::RRX.opcode();
        self.tx_buf[1..=width].fill(Instruction::NOP.opcode());
        let r = self.spi_transfer_tx_buf(width)?;
        // Skip first byte because it contains the status.
        let len = core::cmp::min(width, buf.len());
        buf[..len].copy_from_slice(&r[1..=len]);

        // Clear the data ready flag
        self.write_register(Register::STATUS, 1u8 << 6)?;

        Ok(len)
    }

    /// Loads a payload into the TX FIFO and pulses CE to send it.
    ///
    /// Call [`wait_for_ack()`](#method.wait_for_ack) afterwards to learn whether it arrived.
    ///
    /// # Examples
    /// ```ignore
    /// chip.open_writing_pipe(b"Node1")?;
    /// chip.stop_listening()?;
    /// chip.write(&f.to_le_bytes())?;
    /// match chip.wait_for_ack()? {
    ///     Ack::Received => println!("Successfully wrote the data!"),
    ///     Ack::TimedOut => println!("No acknowledgement"),
    /// }
    /// ```
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, TransferError<SPIErr, PinErr>> {
        let send_count = if let PayloadSize::Static(n) = self.payload_size {
            let n = n as usize;
            // we have to send `n` bytes
            let len = core::cmp::min(buf.len(), n);
            self.tx_buf[1..=len].copy_from_slice(&buf[..len]);
            if len < n {
                self.tx_buf[len + 1..=n].fill(0);
            }
            // now our tx_buf is guarantueed to have `n` bytes filled
            n
        } else {
            // In dynamic payload mode, max payload_size is the limit
            let len = core::cmp::min(buf.len(), MAX_PAYLOAD_SIZE as usize);
            self.tx_buf[1..=len].copy_from_slice(&buf[..len]);
            len
        };

        // Add instruction to buffer
        self.tx_buf[0] = if self.no_ack {
            Instruction::WTX_NOACK.opcode()
        } else {
            Instruction::WTX.opcode()
        };
        self.spi_transfer_tx_buf(send_count)?;

        // Start transmission:
        // pulse CE pin to signal transmission start
        self.set_ce_high()?;
        self.delay.delay_us(15);
        self.set_ce_low()?;

        Ok(send_count)
    }

    /// Polls STATUS until the last payload was sent or the retry budget ran out.
    ///
    /// Clears the interrupt flags. On failure the TX FIFO is flushed so the next payload
    /// is not stuck behind the lost one.
    pub fn wait_for_ack(&mut self) -> Result<Ack, TransferError<SPIErr, PinErr>> {
        let budget_us =
            (self.auto_retry.count() as u32 + 1) * self.auto_retry.delay() + 1_000;
        let polls = budget_us / Self::ACK_POLL_INTERVAL_US;
        for _ in 0..polls {
            let status = self.status()?;
            if status.data_sent() {
                self.write_register(Register::STATUS, Status::flags().value())?;
                return Ok(Ack::Received);
            }
            if status.reached_max_retries() {
                self.write_register(Register::STATUS, Status::flags().value())?;
                self.flush_tx()?;
                return Ok(Ack::TimedOut);
            }
            self.delay.delay_us(Self::ACK_POLL_INTERVAL_US);
        }
        self.flush_tx()?;
        Ok(Ack::TimedOut)
    }

    /// Setup of automatic retransmission.
    ///
    /// # Arguments
    /// * `delay` is the auto retransmit delay.
    /// Values can be between 0 and 15.
    /// The delay before a retransmit is initiated, is calculated according to the following formula:
    /// > ((**delay** + 1) * 250) + 86 µs
    ///
    /// * `count` is number of times there will be an auto retransmission.
    /// Must be a value between 0 and 15.
    ///
    /// # Examples
    /// ```ignore
    /// // Set the auto transmit delay to (5 + 1) * 250) + 86 = 1586µs
    /// // and the retransmit count to 15.
    /// nrf24l01.set_retries((5, 15))?;
    /// ```
    pub fn set_retries<T: Into<AutoRetransmission>>(
        &mut self,
        auto_retry: T,
    ) -> Result<(), TransferError<SPIErr, PinErr>> {
        let auto_retry = auto_retry.into();
        self.write_register(
            Register::SETUP_RETR,
            (auto_retry.raw_delay() << 4) | (auto_retry.count()),
        )?;
        self.auto_retry = auto_retry;
        Ok(())
    }

    /// Returns the auto retransmission config.
    pub fn retries(&mut self) -> Result<AutoRetransmission, TransferError<SPIErr, PinErr>> {
        self.read_register(Register::SETUP_RETR)
            .map(AutoRetransmission::from_register)
    }

    /// Set the frequency channel nRF24L01 operates on.
    ///
    /// # Arguments
    ///
    /// * `channel` number between 0 and 127.
    ///
    /// # Examples
    /// ```ignore
    /// nrf24l01.set_channel(74)?;
    /// ```
    pub fn set_channel(&mut self, channel: u8) -> Result<(), TransferError<SPIErr, PinErr>> {
        self.write_register(Register::RF_CH, (u8::MAX >> 1) & channel)
    }

    /// Return the frequency channel nRF24L01 operates on.
    /// Note that the actual frequency will we the channel +2400 MHz.
    pub fn channel(&mut self) -> Result<u8, TransferError<SPIErr, PinErr>> {
        self.read_register(Register::RF_CH)
    }

    /// Set the address width, saturating values above or below allowed range.
    ///
    /// # Arguments
    ///
    /// * `width` number between 3 and 5.
    pub fn set_address_width<T>(&mut self, width: T) -> Result<(), TransferError<SPIErr, PinErr>>
    where
        T: Into<AddressWidth>,
    {
        let width = width.into();
        self.write_register(Register::SETUP_AW, width.value())
    }

    /// Returns the current data rate as a [`DataRate`] enum.
    pub fn data_rate(&mut self) -> Result<DataRate, TransferError<SPIErr, PinErr>> {
        self.read_register(Register::RF_SETUP).map(DataRate::from)
    }

    /// Returns the current power amplifier level as a [`PALevel`] enum.
    pub fn power_amp_level(&mut self) -> Result<PALevel, TransferError<SPIErr, PinErr>> {
        self.read_register(Register::RF_SETUP).map(PALevel::from)
    }

    /// Flush transmission FIFO, used in TX mode.
    pub fn flush_tx(&mut self) -> Result<(), TransferError<SPIErr, PinErr>> {
        self.send_command(Instruction::FTX).map(|_| ())
    }

    /// Flush reciever FIFO, used in RX mode.
    pub fn flush_rx(&mut self) -> Result<(), TransferError<SPIErr, PinErr>> {
        self.send_command(Instruction::FRX).map(|_| ())
    }

    /// Enable CRC encoding scheme.
    ///
    /// **Note** that this configures the nrf24l01 in transmit mode.
    pub fn enable_crc(
        &mut self,
        scheme: EncodingScheme,
    ) -> Result<(), TransferError<SPIErr, PinErr>> {
        self.write_register(Register::CONFIG, (1 << 3) | (scheme.scheme() << 2))
    }

    /// Sets the payload size in bytes.
    /// This can either be static with a set size, or dynamic.
    ///
    /// `payload_size` can either be an instance of the [`PayloadSize`] enum, or an integer.
    ///
    /// # Notes
    /// * A value of 0 means the dynamic payloads will be enabled.
    /// * Values bigger than [`MAX_PAYLOAD_SIZE`](constant.MAX_PAYLOAD_SIZE.html) will be set to the maximum.
    /// * Dynamic payloads also enable per-payload ACK suppression, which the link layer uses
    ///   for management broadcasts.
    pub fn set_payload_size<T: Into<PayloadSize>>(
        &mut self,
        payload_size: T,
    ) -> Result<(), TransferError<SPIErr, PinErr>> {
        let payload_size = payload_size.into().truncate();
        match payload_size {
            PayloadSize::Static(payload_size) => {
                if self.payload_size == PayloadSize::Dynamic {
                    // currently dynamic payload enabled
                    // Disable dynamic payloads
                    let feature = self.read_register(Register::FEATURE)?;
                    self.write_register(Register::FEATURE, feature & !Self::FEATURE_DYNAMIC)?;
                    self.write_register(Register::DYNPD, 0u8)?;
                }

                self.write_register(Register::RX_PW_P0, payload_size)?;
                self.write_register(Register::RX_PW_P1, payload_size)?;
                self.write_register(Register::RX_PW_P2, payload_size)?;
                self.write_register(Register::RX_PW_P3, payload_size)?;
                self.write_register(Register::RX_PW_P4, payload_size)?;
                self.write_register(Register::RX_PW_P5, payload_size)?;
            }
            PayloadSize::Dynamic => {
                let feature = self.read_register(Register::FEATURE)?;
                self.write_register(Register::FEATURE, feature | Self::FEATURE_DYNAMIC)?;
                self.write_register(Register::DYNPD, 0b0011_1111u8)?; // enable on all pipes
            }
        }
        self.payload_size = payload_size;
        Ok(())
    }

    /// Returns the payload size as a [`PayloadSize`] enum.
    pub fn payload_size(&self) -> PayloadSize {
        self.payload_size
    }

    /// Powers the chip up. Note that a new initialized device will already be in power up mode, so
    /// calling [`power_up()`](#method.power_up) is not necessary.
    ///
    /// Should be called after [`power_down()`](#method.power_down) to put the chip back into power up mode.
    pub fn power_up(&mut self) -> Result<(), TransferError<SPIErr, PinErr>> {
        // if not powered up, power up and wait for the radio to initialize
        if !self.is_powered_up() {
            // update the stored config register
            self.config_reg |= 1 << 1;
            self.write_register(Register::CONFIG, self.config_reg)?;

            self.delay.delay_ms(5);
        }
        Ok(())
    }

    /// Powers the chip down. This is the low power mode.
    /// The chip will consume approximatly 900nA.
    ///
    /// To power the chip back up, call [`power_up()`](#method.power_up).
    pub fn power_down(&mut self) -> Result<(), TransferError<SPIErr, PinErr>> {
        self.set_ce_low()?;
        self.config_reg &= !(1 << 1);
        self.write_register(Register::CONFIG, self.config_reg)?;
        Ok(())
    }

    /// Reads the status register from device. See [`Status`].
    pub fn status(&mut self) -> Result<Status, TransferError<SPIErr, PinErr>> {
        self.send_command(Instruction::NOP)
    }

    /// Reads the FIFO status register. See [`FIFOStatus`].
    pub fn fifo_status(&mut self) -> Result<FIFOStatus, TransferError<SPIErr, PinErr>> {
        self.read_register(Register::FIFO_STATUS).map(FIFOStatus::from)
    }

    /// Resets the following flags in the status register:
    /// - data ready RX fifo interrupt
    /// - data sent TX fifo interrupt
    /// - maximum number of number of retries interrupt
    pub fn reset_status(&mut self) -> Result<(), TransferError<SPIErr, PinErr>> {
        self.write_register(Register::STATUS, Self::STATUS_RESET)
    }

    /// Sends an instruction over the SPI bus without extra data.
    ///
    /// Returns the status recieved from the device.
    /// Normally used for the other instructions than read and write.
    fn send_command(
        &mut self,
        instruction: Instruction,
    ) -> Result<Status, TransferError<SPIErr, PinErr>> {
        self.tx_buf[0] = instruction.opcode();
        let r = self.spi_transfer_tx_buf(0)?;
        Ok(Status::from(r[0]))
    }

    /// Writes values to a given register.
    ///
    /// This can be anything that can be turned into a buffer of u8's.
    /// `IntoBuf` is currently implemented for T and for &[T].
    /// This means that this function can be polymorphically called for single value writes as well
    /// as for arrays.
    fn write_register<T: IntoBuf<u8>>(
        &mut self,
        register: Register,
        buf: T,
    ) -> Result<(), TransferError<SPIErr, PinErr>> {
        let buf = buf.into_buf();
        // Use tx buffer to copy the values into
        // First byte will be the opcode
        self.tx_buf[0] = Instruction::WR.opcode() | register.addr();
        // Copy over the values
        self.tx_buf[1..=buf.len()].copy_from_slice(buf);
        self.spi_write_tx_buf(buf.len())
    }

    fn read_register(&mut self, register: Register) -> Result<u8, TransferError<SPIErr, PinErr>> {
        self.tx_buf[..2].copy_from_slice(&[Instruction::RR.opcode() | register.addr(), 0]);
        Ok(self.spi_transfer_tx_buf(1)?[1])
    }

    fn setup_rf(
        &mut self,
        data_rate: DataRate,
        level: PALevel,
    ) -> Result<(), TransferError<SPIErr, PinErr>> {
        self.write_register(Register::RF_SETUP, data_rate.rate() | level.level())
    }

    fn is_powered_up(&self) -> bool {
        self.config_reg & (1 << 1) != 0
    }
}

/// Helper functions for setting Chip Enable pin.
/// Returns the error enum defined in this crate, so the rest of the code can use the
/// `?` operator.
impl<SPI, CE, D, PinErr> Nrf24l01<SPI, CE, D>
where
    CE: OutputPin<Error = PinErr>,
{
    fn set_ce_high<SPIErr>(&mut self) -> Result<(), TransferError<SPIErr, PinErr>> {
        self.ce.set_high().map_err(TransferError::Pin)
    }
    fn set_ce_low<SPIErr>(&mut self) -> Result<(), TransferError<SPIErr, PinErr>> {
        self.ce.set_low().map_err(TransferError::Pin)
    }
}

/// Helper functions for transfering data over the SPI bus.
/// Returns the error enum defined in this crate, so the rest of the code can use the
/// `?` operator.
impl<SPI, CE, D, SPIErr> Nrf24l01<SPI, CE, D>
where
    SPI: SpiDevice<u8, Error = SPIErr>,
{
    /// *NOTE*
    /// Make sure the data to be transfered is copied to the TX Buf before calling this function.
    /// Because the first byte always has to be the command, the `len` argument
    /// is the inclusive length.
    fn spi_transfer_tx_buf<PinErr>(
        &mut self,
        len: usize,
    ) -> Result<&[u8], TransferError<SPIErr, PinErr>> {
        self.spi
            .transfer_in_place(&mut self.tx_buf[..=len])
            .map_err(TransferError::Spi)?;
        Ok(&self.tx_buf[..=len])
    }

    /// *NOTE*
    /// Make sure the data to be written is copied to the TX Buf before calling this function.
    /// Because the first byte always has to be the command, the `len` argument
    /// is the inclusive length.
    fn spi_write_tx_buf<PinErr>(
        &mut self,
        len: usize,
    ) -> Result<(), TransferError<SPIErr, PinErr>> {
        self.spi
            .write(&self.tx_buf[..=len])
            .map_err(TransferError::Spi)
    }
}

impl<SPI, CE, D, SPIErr, PinErr> Radio for Nrf24l01<SPI, CE, D>
where
    SPI: SpiDevice<u8, Error = SPIErr>,
    CE: OutputPin<Error = PinErr>,
    D: DelayNs,
{
    type Error = TransferError<SPIErr, PinErr>;

    fn set_channel(&mut self, channel: u8) -> Result<(), Self::Error> {
        Nrf24l01::set_channel(self, channel)
    }

    fn open_pipe(&mut self, pipe: DataPipe, address: &AccessAddress) -> Result<(), Self::Error> {
        self.open_reading_pipe(pipe, address.as_bytes())?;
        self.pipe_addresses[pipe.pipe() as usize] = Some(*address);
        Ok(())
    }

    fn close_pipe(&mut self, pipe: DataPipe) -> Result<(), Self::Error> {
        self.close_reading_pipe(pipe)?;
        self.pipe_addresses[pipe.pipe() as usize] = None;
        Ok(())
    }

    fn set_standby(&mut self) -> Result<(), Self::Error> {
        self.stop_listening()
    }

    fn set_rx_mode(&mut self) -> Result<(), Self::Error> {
        // TX mode borrows pipe 0 for acknowledgements, give it back its own address
        if let Some(address) = self.pipe_addresses[0] {
            self.write_register(Register::RX_ADDR_P0, &address.as_bytes()[..])?;
        }
        self.start_listening()
    }

    fn set_tx_mode(&mut self, pipe: DataPipe, ack: bool) -> Result<(), Self::Error> {
        let address = self.pipe_addresses[pipe.pipe() as usize]
            .ok_or(TransferError::CommunicationError(pipe.pipe()))?;
        self.stop_listening()?;
        self.open_writing_pipe(address.as_bytes())?;
        self.no_ack = !ack;
        Ok(())
    }

    fn transmit(&mut self, frame: &[u8]) -> Result<usize, Self::Error> {
        self.write(frame)
    }

    fn wait_for_ack(&mut self) -> Result<Ack, Self::Error> {
        Nrf24l01::wait_for_ack(self)
    }

    fn poll_available_pipe(&mut self) -> Result<Option<DataPipe>, Self::Error> {
        self.data_available_on_pipe()
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.read(buf)
    }
}

impl<SPI, CE, D> fmt::Debug for Nrf24l01<SPI, CE, D>
where
    SPI: fmt::Debug,
    CE: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Nrf24l01")
            .field("spi", &self.spi)
            .field("ce", &self.ce)
            .field("config_reg", &self.config_reg)
            .field("payload_size", &self.payload_size)
            .field("pipe_addresses", &self.pipe_addresses)
            .field("tx_buf", &&self.tx_buf[1..])
            .finish()
    }
}

/// A trait representing a type that can be turned into a buffer.
///
/// Is used for representing single values as well as slices as buffers.
trait IntoBuf<T> {
    fn into_buf(&self) -> &[T];
}

impl<T> IntoBuf<T> for T {
    fn into_buf(&self) -> &[T] {
        core::slice::from_ref(self)
    }
}
impl<T> IntoBuf<T> for &[T] {
    fn into_buf(&self) -> &[T] {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::digital::{
        Mock as PinMock, State as PinState, Transaction as PinTransaction,
    };
    use embedded_hal_mock::eh1::spi::{Mock as SpiMock, Transaction as SpiTransaction};
    use std::vec;
    use std::vec::Vec;

    type MockChip = Nrf24l01<SpiMock<u8>, PinMock, NoopDelay>;

    fn write(bytes: Vec<u8>) -> [SpiTransaction<u8>; 3] {
        [
            SpiTransaction::transaction_start(),
            SpiTransaction::write_vec(bytes),
            SpiTransaction::transaction_end(),
        ]
    }

    fn transfer(expected: Vec<u8>, response: Vec<u8>) -> [SpiTransaction<u8>; 3] {
        [
            SpiTransaction::transaction_start(),
            SpiTransaction::transfer_in_place(expected, response),
            SpiTransaction::transaction_end(),
        ]
    }

    fn mk_chip(
        spi: &[SpiTransaction<u8>],
        ce: &[PinTransaction],
    ) -> (MockChip, SpiMock<u8>, PinMock) {
        let spi = SpiMock::new(spi);
        let ce = PinMock::new(ce);
        let chip = Nrf24l01::with_parts(spi.clone(), ce.clone(), NoopDelay);
        (chip, spi, ce)
    }

    #[test]
    fn set_channel_writes_rf_ch() {
        let (mut chip, mut spi, mut ce) = mk_chip(&write(vec![0x25, 76]), &[]);
        Radio::set_channel(&mut chip, 76).unwrap();
        spi.done();
        ce.done();
    }

    #[test]
    fn polls_pipe_from_status() {
        let expectations: Vec<_> = transfer(vec![0xff], vec![0b0100_0010])
            .into_iter()
            .chain(transfer(vec![0xff], vec![0b0000_1110]))
            .collect();
        let (mut chip, mut spi, mut ce) = mk_chip(&expectations, &[]);
        assert_eq!(chip.poll_available_pipe().unwrap(), Some(DataPipe::DP1));
        assert_eq!(chip.poll_available_pipe().unwrap(), None);
        spi.done();
        ce.done();
    }

    #[test]
    fn receive_reads_dynamic_width() {
        let expectations: Vec<_> = transfer(vec![0x60, 0x00], vec![0x42, 3])
            .into_iter()
            .chain(transfer(vec![0x61, 0xff, 0xff, 0xff], vec![0x42, 7, 8, 9]))
            .chain(write(vec![0x27, 0x40]))
            .collect();
        let (mut chip, mut spi, mut ce) = mk_chip(&expectations, &[]);
        let mut buf = [0u8; 32];
        assert_eq!(Radio::receive(&mut chip, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[7, 8, 9]);
        spi.done();
        ce.done();
    }

    #[test]
    fn transmit_and_ack() {
        let aa = [1, 2, 3, 4, 5];
        let expectations: Vec<_> = write(vec![0x20, 0x00])
            .into_iter()
            .chain(write(vec![0x2a, 1, 2, 3, 4, 5]))
            .chain(write(vec![0x30, 1, 2, 3, 4, 5]))
            .chain(transfer(vec![0xa0, 0xaa, 0xbb], vec![0x0e, 0, 0]))
            .chain(transfer(vec![0xff], vec![0x2e]))
            .chain(write(vec![0x27, 0x70]))
            .collect();
        let pins = [
            PinTransaction::set(PinState::Low),
            PinTransaction::set(PinState::High),
            PinTransaction::set(PinState::Low),
        ];
        let (mut chip, mut spi, mut ce) = mk_chip(&expectations, &pins);
        chip.pipe_addresses[1] = Some(AccessAddress::new(aa));

        chip.set_tx_mode(DataPipe::DP1, true).unwrap();
        assert_eq!(chip.transmit(&[0xaa, 0xbb]).unwrap(), 2);
        assert_eq!(Radio::wait_for_ack(&mut chip).unwrap(), Ack::Received);
        spi.done();
        ce.done();
    }

    #[test]
    fn broadcast_skips_ack_and_max_retries_flushes() {
        let aa = AccessAddress::MANAGEMENT;
        let expectations: Vec<_> = write(vec![0x20, 0x00])
            .into_iter()
            .chain(write(vec![0x2a, 0xe7, 0xe7, 0xe7, 0xe7, 0xe7]))
            .chain(write(vec![0x30, 0xe7, 0xe7, 0xe7, 0xe7, 0xe7]))
            .chain(transfer(vec![0xb0, 0x01], vec![0x0e, 0]))
            .chain(transfer(vec![0xff], vec![0x1e]))
            .chain(write(vec![0x27, 0x70]))
            .chain(transfer(vec![0xe1], vec![0x0e]))
            .collect();
        let pins = [
            PinTransaction::set(PinState::Low),
            PinTransaction::set(PinState::High),
            PinTransaction::set(PinState::Low),
        ];
        let (mut chip, mut spi, mut ce) = mk_chip(&expectations, &pins);
        chip.pipe_addresses[0] = Some(aa);

        chip.set_tx_mode(DataPipe::DP0, false).unwrap();
        chip.transmit(&[0x01]).unwrap();
        assert_eq!(Radio::wait_for_ack(&mut chip).unwrap(), Ack::TimedOut);
        spi.done();
        ce.done();
    }

    #[test]
    fn tx_mode_needs_open_pipe() {
        let (mut chip, mut spi, mut ce) = mk_chip(&[], &[]);
        assert!(matches!(
            chip.set_tx_mode(DataPipe::DP3, true),
            Err(TransferError::CommunicationError(3))
        ));
        spi.done();
        ce.done();
    }
}
