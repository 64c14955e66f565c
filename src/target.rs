//! The service under test.
//!
//! Horde treats the target as a black box: a [`Target`] takes one [`Step`] and either
//! completes it or reports a [`CallError`]. [`HttpTarget`] talks to a real server over
//! HTTP; tests plug in their own implementations.
use std::future::Future;

use crate::{error::CallError, scenario::Step};

/// Something a simulated user can call.
///
/// Implementations must be cheap to share: one instance serves every simulated user
/// of a run, concurrently. Build heavy resources (clients, pools) once, up front.
///
/// # Example
/// ```rust
/// use horde::{Target, error::CallError, scenario::Step};
///
/// struct AlwaysUp;
///
/// impl Target for AlwaysUp {
///     async fn call(&self, _step: &Step) -> Result<(), CallError> {
///         Ok(())
///     }
/// }
/// ```
pub trait Target: Send + Sync + 'static {
    /// Perform the request described by `step`. The response content is not inspected
    /// beyond what `step` requires.
    fn call(&self, step: &Step) -> impl Future<Output = Result<(), CallError>> + Send;
}

#[cfg(feature = "http")]
pub use http::HttpTarget;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use reqwest::Client;

    use super::*;
    use crate::scenario::Request;

    /// A [`Target`] reached over plain HTTP.
    ///
    /// Step paths are appended to `base_url`. The underlying client is shared by all
    /// users and keeps its own connection pool.
    #[derive(Clone, Debug)]
    pub struct HttpTarget {
        client: Client,
        base_url: String,
    }

    impl HttpTarget {
        /// `timeout`, when set, bounds every request end to end.
        pub fn new(
            base_url: impl Into<String>,
            timeout: Option<Duration>,
        ) -> Result<Self, CallError> {
            let mut builder = Client::builder();
            if let Some(timeout) = timeout {
                builder = builder.timeout(timeout);
            }
            let base_url = base_url.into().trim_end_matches('/').to_owned();
            Ok(Self {
                client: builder.build()?,
                base_url,
            })
        }

        pub fn base_url(&self) -> &str {
            &self.base_url
        }

        fn url(&self, path: &str) -> String {
            format!("{}{}", self.base_url, path)
        }
    }

    impl Target for HttpTarget {
        async fn call(&self, step: &Step) -> Result<(), CallError> {
            let url = self.url(step.request.path());
            let request = match &step.request {
                Request::Get { .. } => self.client.get(&url),
                Request::PostForm { form, .. } => self.client.post(&url).form(form),
            };

            let response = request.send().await?;
            let status = response.status();
            // Read the body to the end so the connection can go back to the pool.
            response.bytes().await?;

            if step.require_success && !status.is_success() {
                return Err(CallError::Status {
                    status: status.as_u16(),
                    path: step.request.path().to_owned(),
                });
            }
            Ok(())
        }
    }
}
