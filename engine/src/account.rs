//! Account Provisioning
//!
//! Disposable-account lifecycle against the remote service: request an
//! access code, then log in with it, optionally rotating across the proxy
//! pool until an attempt lands.
//!
//! # Provisioning Flow
//!
//! 1. `POST /api/access-code` issues a code plus `sid` and `acc_count`
//!    cookies.
//! 2. `POST /login` with the code (and those cookies) authenticates the
//!    session; the service answers with a fresh `sid`.
//!
//! Both steps must travel the same path: a code issued through one proxy is
//! bound to it, so a retry always restarts from step 1 on a new path.
//!
//! # Attempt Budget
//!
//! With proxies configured, the attempt budget is fixed when provisioning
//! starts: `min(available proxies, configured cap)`. Failed paths are
//! blacklisted as they fail, so one bad pool cannot loop forever. Without
//! proxies there is exactly one direct attempt.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventSink};
use crate::proxy::{Proxy, ProxyPool};
use crate::transport::{ChatTransport, TransportError, TransportRequest};

// =============================================================================
// Account Types
// =============================================================================

/// Public snapshot of an account, safe to put on the event stream
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    /// The access code the account was created from
    pub code: String,
    /// When the account was provisioned
    pub created_at: DateTime<Utc>,
}

/// An authenticated disposable account
#[derive(Clone, Debug)]
pub struct Account {
    /// Session cookie value (refreshed by login)
    pub sid: String,
    /// Account-count cookie value issued alongside the access code
    pub acc_count: String,
    /// The access code this account was created from
    pub code: String,
    /// When the account was provisioned
    pub created_at: DateTime<Utc>,
    /// Proxy the account is bound to, if provisioning went through one
    pub proxy: Option<Proxy>,
}

impl Account {
    /// Snapshot for events and state queries
    #[must_use]
    pub fn info(&self) -> AccountInfo {
        AccountInfo {
            code: self.code.clone(),
            created_at: self.created_at,
        }
    }

    /// `Cookie` header value for authenticated requests
    #[must_use]
    pub fn cookie_header(&self) -> String {
        format!("sid={}; acc_count={}", self.sid, self.acc_count)
    }
}

/// Body of a successful access-code response
#[derive(Debug, Deserialize)]
struct AccessCodeBody {
    /// The issued access code
    code: String,
}

// =============================================================================
// Attempt Classification
// =============================================================================

/// How a single provisioning attempt failed
#[derive(Debug)]
enum AttemptFailure {
    /// 429 while requesting an access code; another path may get through
    RateLimited,
    /// 429 while logging in; the whole flow is throttled, stop retrying
    RateLimitedTerminal,
    /// Failure attributable to the transport path (carries the blacklist
    /// reason)
    Path(String),
    /// The service answered 200 but broke the wire contract
    Protocol(String),
}

/// Classify a transport failure from the access-code step
fn issue_failure(error: TransportError) -> AttemptFailure {
    match error {
        TransportError::RateLimited => AttemptFailure::RateLimited,
        other => path_failure(other),
    }
}

/// Classify a transport failure from the login step
fn login_failure(error: TransportError) -> AttemptFailure {
    match error {
        TransportError::RateLimited => AttemptFailure::RateLimitedTerminal,
        other => path_failure(other),
    }
}

/// Shared path-failure classification for both steps
fn path_failure(error: TransportError) -> AttemptFailure {
    match error {
        TransportError::ProxyFailure { status } => {
            AttemptFailure::Path(format!("rejected with status {status}"))
        }
        TransportError::InvalidProxy { message, .. } => {
            AttemptFailure::Path(format!("invalid proxy: {message}"))
        }
        TransportError::Connection { message, .. } => AttemptFailure::Path(message),
        TransportError::UnexpectedStatus { status } => {
            AttemptFailure::Protocol(format!("unexpected status {status}"))
        }
        TransportError::RateLimited => AttemptFailure::RateLimited,
    }
}

// =============================================================================
// Account Manager
// =============================================================================

/// Provisions accounts over a [`ChatTransport`]
pub struct AccountManager<T: ChatTransport> {
    /// Transport shared with the engine
    transport: Arc<T>,
    /// Event sink for provisioning progress
    events: EventSink,
}

impl<T: ChatTransport> AccountManager<T> {
    /// Create a manager over the given transport
    pub fn new(transport: Arc<T>, events: EventSink) -> Self {
        Self { transport, events }
    }

    /// Provision a fresh account, rotating across the pool on failure.
    ///
    /// Emits [`EngineEvent::AccountCreating`] up front and either
    /// [`EngineEvent::AccountCreated`] or [`EngineEvent::AccountError`] when
    /// the outcome is known.
    ///
    /// # Errors
    ///
    /// - [`EngineError::ProxyExhausted`] when every selectable path failed
    /// - [`EngineError::RateLimited`] when the service throttled the flow
    /// - [`EngineError::Connection`] when the single direct attempt failed
    /// - [`EngineError::RemoteProtocol`] when a 200 response broke the
    ///   contract
    pub async fn create_account(
        &self,
        config: &EngineConfig,
        pool: &mut ProxyPool,
    ) -> Result<Account, EngineError> {
        self.events.emit(EngineEvent::AccountCreating);

        let result = self.create_with_rotation(config, pool).await;
        match &result {
            Ok(account) => {
                debug!(code = %account.code, "Account provisioned");
                self.events.emit(EngineEvent::AccountCreated {
                    account: account.info(),
                });
            }
            Err(error) => {
                warn!(%error, "Account provisioning failed");
                self.events.emit(EngineEvent::AccountError {
                    message: error.to_string(),
                });
            }
        }
        result
    }

    /// Drive attempts across the pool until one lands or the budget runs out
    async fn create_with_rotation(
        &self,
        config: &EngineConfig,
        pool: &mut ProxyPool,
    ) -> Result<Account, EngineError> {
        if pool.is_empty() {
            // No pool configured: exactly one direct attempt.
            return match self.attempt(config, None).await {
                Ok(account) => Ok(account),
                Err(AttemptFailure::RateLimited | AttemptFailure::RateLimitedTerminal) => {
                    Err(EngineError::RateLimited { attempts: 1 })
                }
                Err(AttemptFailure::Path(message)) => Err(EngineError::Connection { message }),
                Err(AttemptFailure::Protocol(message)) => {
                    Err(EngineError::RemoteProtocol { message })
                }
            };
        }

        let budget = (pool.available() as u32).min(config.max_account_attempts);
        let mut attempts: u32 = 0;

        loop {
            // Stay on the current proxy when it is still viable; otherwise
            // advance to the next non-blacklisted entry.
            let proxy = match pool.current().cloned() {
                Some(p) => p,
                None => match pool.next() {
                    Ok(p) => p.clone(),
                    Err(_) => return Err(EngineError::ProxyExhausted { attempts }),
                },
            };

            attempts += 1;
            debug!(proxy = %proxy, attempt = attempts, budget, "Provisioning attempt");

            match self.attempt(config, Some(&proxy)).await {
                Ok(account) => return Ok(account),
                Err(AttemptFailure::RateLimited) => {
                    pool.blacklist(&proxy.key(), "rate limited");
                    if attempts >= budget {
                        return Err(EngineError::RateLimited { attempts });
                    }
                    tokio::time::sleep(config.retry_delay).await;
                }
                Err(AttemptFailure::RateLimitedTerminal) => {
                    return Err(EngineError::RateLimited { attempts });
                }
                Err(AttemptFailure::Path(reason)) => {
                    pool.blacklist(&proxy.key(), &reason);
                    if attempts >= budget {
                        return Err(EngineError::ProxyExhausted { attempts });
                    }
                }
                Err(AttemptFailure::Protocol(message)) => {
                    return Err(EngineError::RemoteProtocol { message });
                }
            }
        }
    }

    /// One full provisioning attempt over one path
    async fn attempt(
        &self,
        config: &EngineConfig,
        proxy: Option<&Proxy>,
    ) -> Result<Account, AttemptFailure> {
        // Step 1: request an access code.
        let request = TransportRequest::post(config.url("/api/access-code"))
            .with_header("User-Agent", &config.user_agent)
            .with_header("Accept", "*/*")
            .with_header("Origin", config.origin())
            .with_header("Referer", config.url("/sign-up"));

        let response = self
            .transport
            .request(request, proxy)
            .await
            .map_err(issue_failure)?;

        let issued: AccessCodeBody = serde_json::from_str(&response.body).map_err(|_| {
            AttemptFailure::Protocol("access code response carried no code".to_string())
        })?;
        let sid = response
            .cookie("sid")
            .ok_or_else(|| {
                AttemptFailure::Protocol("access code response set no sid cookie".to_string())
            })?
            .to_string();
        let acc_count = response
            .cookie("acc_count")
            .ok_or_else(|| {
                AttemptFailure::Protocol("access code response set no acc_count cookie".to_string())
            })?
            .to_string();

        self.events.emit(EngineEvent::AccountCodeIssued {
            code: issued.code.clone(),
        });

        // Step 2: log in with the code over the same path, presenting the
        // cookies from step 1.
        let request = TransportRequest::post(config.url("/login"))
            .with_header("User-Agent", &config.user_agent)
            .with_header("Accept", "application/json")
            .with_header("Origin", config.origin())
            .with_header("Referer", config.url("/login"))
            .with_header("Cookie", format!("sid={sid}; acc_count={acc_count}"))
            .with_form(vec![("code".to_string(), issued.code.clone())]);

        let response = self
            .transport
            .request(request, proxy)
            .await
            .map_err(login_failure)?;

        // Login rotates the session cookie; a 200 without one is the
        // service breaking its contract.
        let sid = response
            .cookie("sid")
            .ok_or_else(|| AttemptFailure::Protocol("login refreshed no sid cookie".to_string()))?
            .to_string();

        Ok(Account {
            sid,
            acc_count,
            code: issued.code,
            created_at: Utc::now(),
            proxy: proxy.cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::test_support::MockTransport;

    fn test_config() -> EngineConfig {
        // Keep rate-limit retries instant under test.
        EngineConfig {
            retry_delay: Duration::from_millis(0),
            ..EngineConfig::default()
        }
    }

    fn success_pair(transport: &MockTransport) {
        transport.push_response(
            200,
            r#"{"code":"ABC123"}"#,
            &[("sid", "issued-sid"), ("acc_count", "0")],
        );
        transport.push_response(200, "{}", &[("sid", "fresh-sid")]);
    }

    #[tokio::test]
    async fn test_direct_creation() {
        let transport = Arc::new(MockTransport::new());
        success_pair(&transport);

        let (sink, mut rx) = EventSink::channel();
        let manager = AccountManager::new(transport.clone(), sink);
        let mut pool = ProxyPool::default();

        let account = manager
            .create_account(&test_config(), &mut pool)
            .await
            .unwrap();

        assert_eq!(account.code, "ABC123");
        assert_eq!(account.sid, "fresh-sid");
        assert_eq!(account.acc_count, "0");
        assert!(account.proxy.is_none());
        assert_eq!(account.cookie_header(), "sid=fresh-sid; acc_count=0");

        assert_eq!(rx.try_recv().unwrap(), EngineEvent::AccountCreating);
        assert_eq!(
            rx.try_recv().unwrap(),
            EngineEvent::AccountCodeIssued {
                code: "ABC123".to_string()
            }
        );
        match rx.try_recv().unwrap() {
            EngineEvent::AccountCreated { account: info } => {
                assert_eq!(info.code, "ABC123");
            }
            other => panic!("Expected AccountCreated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_request_shapes() {
        let transport = Arc::new(MockTransport::new());
        success_pair(&transport);

        let manager = AccountManager::new(transport.clone(), EventSink::disabled());
        let mut pool = ProxyPool::default();
        let config = test_config();

        manager.create_account(&config, &mut pool).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);

        let issue = &requests[0].request;
        assert_eq!(issue.url, "https://skynetchat.net/api/access-code");
        assert_eq!(issue.header("Accept"), Some("*/*"));
        assert_eq!(issue.header("Origin"), Some("https://skynetchat.net"));
        assert_eq!(
            issue.header("Referer"),
            Some("https://skynetchat.net/sign-up")
        );
        assert_eq!(issue.header("User-Agent"), Some(config.user_agent.as_str()));

        let login = &requests[1].request;
        assert_eq!(login.url, "https://skynetchat.net/login");
        assert_eq!(login.header("Accept"), Some("application/json"));
        assert_eq!(
            login.header("Referer"),
            Some("https://skynetchat.net/login")
        );
        // Login presents the cookies from issuance, not the refreshed sid.
        assert_eq!(
            login.header("Cookie"),
            Some("sid=issued-sid; acc_count=0")
        );
        match &login.body {
            crate::transport::RequestBody::Form(fields) => {
                assert_eq!(fields.len(), 1);
                assert_eq!(fields[0], ("code".to_string(), "ABC123".to_string()));
            }
            other => panic!("Expected form body, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rotation_on_path_failure() {
        let transport = Arc::new(MockTransport::new());
        transport.push_error(TransportError::ProxyFailure { status: 302 });
        success_pair(&transport);

        let manager = AccountManager::new(transport.clone(), EventSink::disabled());
        let mut pool = ProxyPool::default();
        pool.add(Proxy::new("10.0.0.1", 8080));
        pool.add(Proxy::new("10.0.0.2", 8080));

        let account = manager
            .create_account(&test_config(), &mut pool)
            .await
            .unwrap();

        assert_eq!(
            account.proxy.as_ref().map(Proxy::key),
            Some("10.0.0.2:8080".to_string())
        );
        assert!(pool.is_blacklisted("10.0.0.1:8080"));
        assert_eq!(
            pool.blacklist_reason("10.0.0.1:8080"),
            Some("rejected with status 302")
        );
        assert_eq!(transport.requests().len(), 3);
        assert_eq!(
            transport.requests()[0].proxy_key,
            Some("10.0.0.1:8080".to_string())
        );
        assert_eq!(
            transport.requests()[1].proxy_key,
            Some("10.0.0.2:8080".to_string())
        );
    }

    #[tokio::test]
    async fn test_pool_exhaustion() {
        let transport = Arc::new(MockTransport::new());
        transport.push_error(TransportError::Connection {
            message: "timed out".to_string(),
            via_proxy: true,
        });
        transport.push_error(TransportError::Connection {
            message: "timed out".to_string(),
            via_proxy: true,
        });

        let manager = AccountManager::new(transport.clone(), EventSink::disabled());
        let mut pool = ProxyPool::default();
        pool.add(Proxy::new("10.0.0.1", 8080));
        pool.add(Proxy::new("10.0.0.2", 8080));

        let error = manager
            .create_account(&test_config(), &mut pool)
            .await
            .unwrap_err();

        assert!(matches!(error, EngineError::ProxyExhausted { attempts: 2 }));
        assert_eq!(pool.available(), 0);
    }

    #[tokio::test]
    async fn test_attempt_cap_spares_remaining_proxies() {
        let transport = Arc::new(MockTransport::new());
        transport.push_error(TransportError::ProxyFailure { status: 403 });
        transport.push_error(TransportError::ProxyFailure { status: 403 });

        let manager = AccountManager::new(transport.clone(), EventSink::disabled());
        let mut config = test_config();
        config.max_account_attempts = 2;
        let mut pool = ProxyPool::default();
        pool.add(Proxy::new("10.0.0.1", 8080));
        pool.add(Proxy::new("10.0.0.2", 8080));
        pool.add(Proxy::new("10.0.0.3", 8080));

        let error = manager
            .create_account(&config, &mut pool)
            .await
            .unwrap_err();

        assert!(matches!(error, EngineError::ProxyExhausted { attempts: 2 }));
        // The cap stopped the loop before the third proxy was touched.
        assert_eq!(pool.available(), 1);
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_direct_rate_limit() {
        let transport = Arc::new(MockTransport::new());
        transport.push_error(TransportError::RateLimited);

        let manager = AccountManager::new(transport.clone(), EventSink::disabled());
        let mut pool = ProxyPool::default();

        let error = manager
            .create_account(&test_config(), &mut pool)
            .await
            .unwrap_err();

        assert!(matches!(error, EngineError::RateLimited { attempts: 1 }));
    }

    #[tokio::test]
    async fn test_rate_limit_rotates_to_next_proxy() {
        let transport = Arc::new(MockTransport::new());
        transport.push_error(TransportError::RateLimited);
        success_pair(&transport);

        let manager = AccountManager::new(transport.clone(), EventSink::disabled());
        let mut pool = ProxyPool::default();
        pool.add(Proxy::new("10.0.0.1", 8080));
        pool.add(Proxy::new("10.0.0.2", 8080));

        let account = manager
            .create_account(&test_config(), &mut pool)
            .await
            .unwrap();

        assert_eq!(
            account.proxy.as_ref().map(Proxy::key),
            Some("10.0.0.2:8080".to_string())
        );
        assert_eq!(pool.blacklist_reason("10.0.0.1:8080"), Some("rate limited"));
    }

    #[tokio::test]
    async fn test_login_rate_limit_is_terminal() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(
            200,
            r#"{"code":"ABC123"}"#,
            &[("sid", "issued-sid"), ("acc_count", "0")],
        );
        transport.push_error(TransportError::RateLimited);

        let manager = AccountManager::new(transport.clone(), EventSink::disabled());
        let mut pool = ProxyPool::default();
        pool.add(Proxy::new("10.0.0.1", 8080));
        pool.add(Proxy::new("10.0.0.2", 8080));

        let error = manager
            .create_account(&test_config(), &mut pool)
            .await
            .unwrap_err();

        assert!(matches!(error, EngineError::RateLimited { attempts: 1 }));
        // The throttle is service-side; the path keeps its standing.
        assert_eq!(pool.available(), 2);
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_body_fails_fast() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(200, "{}", &[("sid", "s"), ("acc_count", "0")]);

        let manager = AccountManager::new(transport.clone(), EventSink::disabled());
        let mut pool = ProxyPool::default();
        pool.add(Proxy::new("10.0.0.1", 8080));
        pool.add(Proxy::new("10.0.0.2", 8080));

        let error = manager
            .create_account(&test_config(), &mut pool)
            .await
            .unwrap_err();

        assert!(matches!(error, EngineError::RemoteProtocol { .. }));
        // A contract break is not a path problem; nothing gets blacklisted.
        assert_eq!(pool.available(), 2);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_unexpected_status_fails_fast() {
        let transport = Arc::new(MockTransport::new());
        transport.push_error(TransportError::UnexpectedStatus { status: 500 });

        let manager = AccountManager::new(transport.clone(), EventSink::disabled());
        let mut pool = ProxyPool::default();
        pool.add(Proxy::new("10.0.0.1", 8080));
        pool.add(Proxy::new("10.0.0.2", 8080));

        let error = manager
            .create_account(&test_config(), &mut pool)
            .await
            .unwrap_err();

        match error {
            EngineError::RemoteProtocol { message } => {
                assert!(message.contains("500"));
            }
            other => panic!("Expected RemoteProtocol, got {other:?}"),
        }
        assert_eq!(pool.available(), 2);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_cookie_is_protocol_error() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(200, r#"{"code":"ABC123"}"#, &[("acc_count", "0")]);

        let manager = AccountManager::new(transport.clone(), EventSink::disabled());
        let mut pool = ProxyPool::default();

        let error = manager
            .create_account(&test_config(), &mut pool)
            .await
            .unwrap_err();

        match error {
            EngineError::RemoteProtocol { message } => assert!(message.contains("sid")),
            other => panic!("Expected RemoteProtocol, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_event_on_failure() {
        let transport = Arc::new(MockTransport::new());
        transport.push_error(TransportError::RateLimited);

        let (sink, mut rx) = EventSink::channel();
        let manager = AccountManager::new(transport.clone(), sink);
        let mut pool = ProxyPool::default();

        manager
            .create_account(&test_config(), &mut pool)
            .await
            .unwrap_err();

        assert_eq!(rx.try_recv().unwrap(), EngineEvent::AccountCreating);
        match rx.try_recv().unwrap() {
            EngineEvent::AccountError { message } => {
                assert!(message.contains("rate limited"));
            }
            other => panic!("Expected AccountError, got {other:?}"),
        }
    }
}
