use std::{collections::VecDeque, sync::Arc, time::Duration};

use async_trait::async_trait;
use courier_common::config::RelayConfig;
use parking_lot::Mutex;

use super::{Envelope, Relay, RelaySession};
use crate::ConnectionError;

/// Scripted in-memory relay.
///
/// Every clone shares the same script and counters, so a test can keep one
/// handle while the pool owns another. Unless scripted otherwise every open,
/// probe and transmission succeeds.
///
/// ```
/// use courier_delivery::relay::MockRelay;
///
/// let relay = MockRelay::new();
/// relay.fail_next_sends(2);
/// assert_eq!(relay.sends(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockRelay {
    state: Arc<Mutex<MockState>>,
}

#[derive(Debug, Default)]
struct MockState {
    unreachable: bool,
    reject_credentials: bool,
    /// Bumped to invalidate every session opened before it.
    generation: u64,
    failing_sends: usize,
    failing_probes: usize,
    rejections: VecDeque<u16>,
    always_fail: bool,
    send_delay: Option<Duration>,
    probe_delay: Option<Duration>,
    quit_delay: Option<Duration>,

    opens: usize,
    failed_opens: usize,
    probes: usize,
    sends: usize,
    resets: usize,
    quits: usize,
    delivered: Vec<Envelope>,
}

impl MockRelay {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// While unreachable, every open fails with a transport error.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unreachable = !reachable;
    }

    /// Make every open fail authentication with a 535.
    pub fn reject_credentials(&self, reject: bool) {
        self.state.lock().reject_credentials = reject;
    }

    /// Kill every open session, as a relay timing out idle clients would.
    pub fn drop_sessions(&self) {
        self.state.lock().generation += 1;
    }

    /// The next `count` transmissions break the transport.
    pub fn fail_next_sends(&self, count: usize) {
        self.state.lock().failing_sends = count;
    }

    /// Every transmission breaks the transport.
    pub fn fail_all_sends(&self) {
        self.state.lock().always_fail = true;
    }

    /// The next transmission is answered with `code`.
    pub fn reject_next_send(&self, code: u16) {
        self.state.lock().rejections.push_back(code);
    }

    /// The next `count` probes fail even though the session is intact.
    pub fn fail_next_probes(&self, count: usize) {
        self.state.lock().failing_probes = count;
    }

    /// Hold every transmission for `delay` before answering.
    pub fn set_send_delay(&self, delay: Duration) {
        self.state.lock().send_delay = Some(delay);
    }

    /// Hold every probe for `delay` before answering.
    pub fn set_probe_delay(&self, delay: Duration) {
        self.state.lock().probe_delay = Some(delay);
    }

    /// Hold every QUIT for `delay`.
    pub fn set_quit_delay(&self, delay: Duration) {
        self.state.lock().quit_delay = Some(delay);
    }

    /// Sessions opened successfully.
    #[must_use]
    pub fn opens(&self) -> usize {
        self.state.lock().opens
    }

    /// Opens that were refused.
    #[must_use]
    pub fn failed_opens(&self) -> usize {
        self.state.lock().failed_opens
    }

    #[must_use]
    pub fn probes(&self) -> usize {
        self.state.lock().probes
    }

    /// Transmission attempts, successful or not.
    #[must_use]
    pub fn sends(&self) -> usize {
        self.state.lock().sends
    }

    #[must_use]
    pub fn resets(&self) -> usize {
        self.state.lock().resets
    }

    #[must_use]
    pub fn quits(&self) -> usize {
        self.state.lock().quits
    }

    /// Messages the relay accepted, in order.
    #[must_use]
    pub fn delivered(&self) -> Vec<Envelope> {
        self.state.lock().delivered.clone()
    }
}

#[async_trait]
impl Relay for MockRelay {
    async fn open(&self, _config: &RelayConfig) -> Result<Box<dyn RelaySession>, ConnectionError> {
        let mut state = self.state.lock();

        if state.unreachable {
            state.failed_opens += 1;
            return Err(ConnectionError::Transport(
                "I/O error: Connection refused".to_string(),
            ));
        }

        if state.reject_credentials {
            state.failed_opens += 1;
            return Err(ConnectionError::Authentication {
                code: Some(535),
                message: "535 Authentication credentials invalid".to_string(),
            });
        }

        state.opens += 1;

        Ok(Box::new(MockSession {
            state: Arc::clone(&self.state),
            generation: state.generation,
            open: true,
        }))
    }
}

#[derive(Debug)]
struct MockSession {
    state: Arc<Mutex<MockState>>,
    generation: u64,
    open: bool,
}

impl MockSession {
    fn check_alive(&mut self, state: &MockState) -> Result<(), ConnectionError> {
        if self.open && state.generation == self.generation {
            Ok(())
        } else {
            self.open = false;
            Err(ConnectionError::Transport(
                "Connection closed unexpectedly".to_string(),
            ))
        }
    }
}

#[async_trait]
impl RelaySession for MockSession {
    async fn probe(&mut self) -> Result<(), ConnectionError> {
        let delay = self.state.lock().probe_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = Arc::clone(&self.state);
        let mut state = state.lock();
        state.probes += 1;
        self.check_alive(&state)?;

        if state.failing_probes > 0 {
            state.failing_probes -= 1;
            return Err(ConnectionError::Timeout(Duration::from_secs(30)));
        }

        Ok(())
    }

    async fn transmit(&mut self, envelope: &Envelope) -> Result<(), ConnectionError> {
        let delay = {
            let mut state = self.state.lock();
            state.sends += 1;
            state.send_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = Arc::clone(&self.state);
        let mut state = state.lock();
        self.check_alive(&state)?;

        if state.always_fail || state.failing_sends > 0 {
            state.failing_sends = state.failing_sends.saturating_sub(1);
            self.open = false;
            return Err(ConnectionError::Transport(
                "Connection reset by peer".to_string(),
            ));
        }

        if let Some(code) = state.rejections.pop_front() {
            return Err(ConnectionError::Rejected {
                code,
                message: "Message rejected".to_string(),
            });
        }

        state.delivered.push(envelope.clone());
        Ok(())
    }

    async fn reset(&mut self) {
        self.state.lock().resets += 1;
    }

    async fn quit(&mut self) {
        let delay = self.state.lock().quit_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.open {
            self.open = false;
            self.state.lock().quits += 1;
        }
    }
}
