use crate::connection::Transport;
use crate::protocol::{Frame, Request};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_ATTEMPTS: u32 = 5;
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(2);

#[derive(clap::Parser, Clone, Debug)]
#[group(id = "retry::Args")]
pub struct Args {
    /// How many times a query is attempted before it is given up on.
    #[arg(long, default_value_t = DEFAULT_ATTEMPTS)]
    pub attempts: u32,

    /// Pause after the first failed attempt. The pause doubles after every further failure.
    #[arg(long, default_value = "2s")]
    pub backoff: humantime::Duration,
}

impl Default for Args {
    fn default() -> Self {
        Self { attempts: DEFAULT_ATTEMPTS, backoff: DEFAULT_BACKOFF.into() }
    }
}

/// Bounded retries with exponential backoff around a single query.
///
/// A query attempt fails if the transport fails or the response carries no leading field. Once
/// all attempts are used up the policy hands back an empty [`Frame`], which callers treat as "no
/// new data" rather than as an error.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    pub fn new(args: &Args) -> Self {
        Self { attempts: args.attempts.max(1), backoff: *args.backoff }
    }

    /// The pauses taken between consecutive attempts.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + use<> {
        let backoff = self.backoff;
        (0..self.attempts - 1).map(move |n| backoff.saturating_mul(2u32.saturating_pow(n)))
    }

    pub async fn query<T: Transport>(&self, transport: &T, request: &Request) -> Frame {
        let mut delays = self.delays();
        for attempt in 1..=self.attempts {
            match transport.send(request).await {
                Ok(frame) if !frame.is_blank() => return frame,
                Ok(_) => warn!(attempt, ?request, "stove sent a blank response"),
                Err(e) => warn!(
                    message = "query failed",
                    attempt,
                    ?request,
                    error = (&e as &dyn std::error::Error)
                ),
            }
            let Some(delay) = delays.next() else { break };
            debug!(attempt, ?delay, "backing off before retrying");
            tokio::time::sleep(delay).await;
        }
        warn!(attempts = self.attempts, ?request, "giving up on the query");
        Frame::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedTransport, blank, data, refused};
    use tokio::time::Instant;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(&Args::default())
    }

    #[test]
    fn backoff_doubles() {
        let delays = policy().delays().collect::<Vec<_>>();
        assert_eq!(delays, [2, 4, 8, 16].map(Duration::from_secs));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_with_an_empty_frame() {
        let transport = ScriptedTransport::new([refused(), blank(), refused(), refused(), blank()]);
        let start = Instant::now();
        let frame = policy().query(&transport, &Request::Data).await;
        assert!(frame.fields.is_empty());
        assert_eq!(transport.requests().len(), 5);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(30), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(31), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let transport = ScriptedTransport::new([
            refused(),
            blank(),
            data(r#"["SEL","1","I30001000000000005"]"#),
        ]);
        let start = Instant::now();
        let frame = policy().query(&transport, &Request::Data).await;
        assert_eq!(frame.first_field(), Some("SEL"));
        assert_eq!(transport.requests(), vec![Request::Data; 3]);
        assert!(start.elapsed() < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_policy_does_not_sleep() {
        let policy = RetryPolicy::new(&Args { attempts: 1, ..Args::default() });
        let transport = ScriptedTransport::new([refused()]);
        let start = Instant::now();
        assert!(policy.query(&transport, &Request::Errors).await.fields.is_empty());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
