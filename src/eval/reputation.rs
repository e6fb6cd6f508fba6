//! Optional URL reputation lookup for fetch requests.
//!
//! The engine knows nothing about where reputation data comes from; callers
//! inject a [`UrlChecker`]. Lookups run on a helper thread bounded by a
//! timeout; failures degrade to a verdict chosen by the engine.

use std::sync::{Arc, mpsc};
use std::time::Duration;

use super::decision::Verdict;

/// What a reputation source knows about a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlReport {
    pub verdict: Verdict,
    pub reason: String,
}

/// External reputation source.
pub trait UrlChecker: Send + Sync {
    fn check(&self, url: &str) -> Result<UrlReport, String>;
}

/// A checker plus the limits it runs under.
#[derive(Clone)]
pub struct Reputation {
    pub checker: Arc<dyn UrlChecker>,
    pub timeout: Duration,
    /// Verdict when the lookup fails or times out. `None` uses the fetch
    /// default of the most specific layer that sets one.
    pub fallback: Option<Verdict>,
}

impl std::fmt::Debug for Reputation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reputation")
            .field("timeout", &self.timeout)
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

impl Reputation {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

    pub fn new(checker: Arc<dyn UrlChecker>) -> Self {
        Self {
            checker,
            timeout: Self::DEFAULT_TIMEOUT,
            fallback: None,
        }
    }

    /// Look up `url` on a helper thread, giving up after the timeout.
    ///
    /// Failures are logged and returned as a reason; the caller picks the
    /// degraded verdict.
    pub fn lookup(&self, url: &str) -> Result<UrlReport, String> {
        let (tx, rx) = mpsc::channel();
        let checker = Arc::clone(&self.checker);
        let owned = url.to_string();
        std::thread::spawn(move || {
            // The receiver may have given up already.
            let _ = tx.send(checker.check(&owned));
        });

        let failure = match rx.recv_timeout(self.timeout) {
            Ok(Ok(report)) => return Ok(report),
            Ok(Err(e)) => format!("reputation lookup failed: {e}"),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                format!("reputation lookup timed out after {:?}", self.timeout)
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => "reputation lookup aborted".to_string(),
        };
        log::warn!("{url}: {failure}");
        Err(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Result<UrlReport, String>);

    impl UrlChecker for Fixed {
        fn check(&self, _url: &str) -> Result<UrlReport, String> {
            self.0.clone()
        }
    }

    struct Slow;

    impl UrlChecker for Slow {
        fn check(&self, _url: &str) -> Result<UrlReport, String> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(UrlReport {
                verdict: Verdict::Allow,
                reason: "late".into(),
            })
        }
    }

    #[test]
    fn report_passes_through() {
        let rep = Reputation::new(Arc::new(Fixed(Ok(UrlReport {
            verdict: Verdict::Deny,
            reason: "known malware host".into(),
        }))));
        let report = rep.lookup("https://bad.example/").unwrap();
        assert_eq!(report.verdict, Verdict::Deny);
        assert_eq!(report.reason, "known malware host");
    }

    #[test]
    fn checker_error_is_reported() {
        let rep = Reputation::new(Arc::new(Fixed(Err("dns failure".into()))));
        let err = rep.lookup("https://x.example/").unwrap_err();
        assert!(err.contains("dns failure"));
    }

    #[test]
    fn slow_checker_times_out() {
        let mut rep = Reputation::new(Arc::new(Slow));
        rep.timeout = Duration::from_millis(20);
        let err = rep.lookup("https://x.example/").unwrap_err();
        assert!(err.contains("timed out"));
    }
}
