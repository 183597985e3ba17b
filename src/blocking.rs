//! Blocking and async adapters over the non-blocking socket calls.

use embedded_hal::delay::DelayNs;

use crate::clock::{Clock, Deadline};
use crate::error::Error;
use crate::link::Link;
use crate::radio::Radio;

impl<R, C, D, const N: usize> Link<R, C, D, N>
where
    R: Radio,
    C: Clock,
    D: DelayNs,
{
    /// Repeats `op` while it returns [`Error::WouldBlock`], sleeping `poll_interval_us`
    /// between calls on the link's own delay.
    ///
    /// Gives up with [`Error::TimedOut`] once `timeout_ms` passed on the link clock.
    /// [`Error::Busy`] and every other error are returned as is.
    ///
    /// ```ignore
    /// let n = link.poll_until(1_000, 500, |link| link.read(socket, &mut buf))?;
    /// ```
    pub fn poll_until<T, F>(
        &mut self,
        timeout_ms: u32,
        poll_interval_us: u32,
        mut op: F,
    ) -> Result<T, Error<R::Error>>
    where
        F: FnMut(&mut Self) -> Result<T, Error<R::Error>>,
    {
        let deadline = Deadline::new(self.now_ms(), timeout_ms);
        loop {
            match op(self) {
                Err(Error::WouldBlock) => {}
                other => return other,
            }
            if deadline.is_expired(self.now_ms()) {
                return Err(Error::TimedOut);
            }
            self.delay_mut().delay_us(poll_interval_us);
        }
    }

    /// Same as [`poll_until`](Self::poll_until), awaiting `delay` between calls.
    #[cfg(feature = "async")]
    pub async fn poll_until_async<T, F, A>(
        &mut self,
        delay: &mut A,
        timeout_ms: u32,
        poll_interval_us: u32,
        mut op: F,
    ) -> Result<T, Error<R::Error>>
    where
        F: FnMut(&mut Self) -> Result<T, Error<R::Error>>,
        A: embedded_hal_async::delay::DelayNs,
    {
        let deadline = Deadline::new(self.now_ms(), timeout_ms);
        loop {
            match op(self) {
                Err(Error::WouldBlock) => {}
                other => return other,
            }
            if deadline.is_expired(self.now_ms()) {
                return Err(Error::TimedOut);
            }
            delay.delay_us(poll_interval_us).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::LinkConfig;
    use crate::link::{Link, Protocol, Thing};
    use crate::radio::mock::MockRadio;
    use crate::{Descriptor, Error, MacAddress};
    use core::cell::Cell;
    use embedded_hal::delay::DelayNs;
    use std::boxed::Box;
    use std::rc::Rc;

    /// Delay that advances a shared millisecond counter.
    struct StepDelay(Rc<Cell<u32>>);

    impl DelayNs for StepDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.0.set(self.0.get() + ns.div_ceil(1_000_000));
        }
    }

    type TestThing = Thing<MockRadio, Box<dyn Fn() -> u32>, StepDelay>;

    fn thing() -> TestThing {
        let time = Rc::new(Cell::new(0));
        let now = time.clone();
        let mut link = Link::new(
            MockRadio::new(),
            Box::new(move || now.get()) as Box<dyn Fn() -> u32>,
            StepDelay(time),
            LinkConfig::thing(MacAddress::new([7; 8])),
        );
        link.init().unwrap();
        link
    }

    #[test]
    fn gives_up_after_timeout() {
        let mut link = thing();
        let mut calls = 0;
        let mut buf = [0u8; 32];
        let result = link.poll_until(50, 10_000, |link| {
            calls += 1;
            link.read(Descriptor::MANAGEMENT, &mut buf)
        });
        assert_eq!(result, Err(Error::TimedOut));
        assert_eq!(calls, 6);
    }

    #[test]
    fn returns_first_result() {
        let mut link = thing();
        let mut calls = 0;
        let result = link.poll_until(50, 1_000, |_| {
            calls += 1;
            if calls < 3 {
                Err(Error::WouldBlock)
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn other_errors_pass_through() {
        let mut link = thing();
        let socket = link.socket(Protocol::Raw).unwrap();
        let result = link.poll_until(50, 1_000, |link| link.accept(socket));
        assert_eq!(result, Err(Error::NotPermitted));
    }
}
