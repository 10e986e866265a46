use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::{debug, warn};

use super::error::UpdateError;
use super::fetch::MemoryFetch;
use super::remote::RemoteServices;
use crate::bundle::{is_valid_package_version, version_file_name};
use crate::download::Transport;
use crate::operation::{AsyncOperation, OperationStatus};

/// Requests per file; a retry goes to the alternate host.
pub(crate) const MAX_REQUEST_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VersionStep {
    None,
    Request,
    Wait,
    Done,
}

/// Fetch the current version string of a package from the remote server.
#[derive(Debug)]
pub struct UpdatePackageVersionOperation {
    remote: Arc<RemoteServices>,
    transport: Arc<dyn Transport>,
    package: String,
    append_time_ticks: bool,
    timeout: Duration,
    step: VersionStep,
    fetch: Option<MemoryFetch>,
    attempts: u32,
    version: Option<String>,
    status: OperationStatus,
    error: Option<String>,
    failure: Option<UpdateError>,
}

impl UpdatePackageVersionOperation {
    /// `append_time_ticks` adds a `?t=` query so intermediate caches are bypassed.
    pub fn new(
        remote: Arc<RemoteServices>,
        transport: Arc<dyn Transport>,
        package: impl Into<String>,
        append_time_ticks: bool,
        timeout: Duration,
    ) -> Self {
        Self {
            remote,
            transport,
            package: package.into(),
            append_time_ticks,
            timeout,
            step: VersionStep::None,
            fetch: None,
            attempts: 0,
            version: None,
            status: OperationStatus::None,
            error: None,
            failure: None,
        }
    }

    /// The remote version, once succeeded.
    pub fn package_version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn failure(&self) -> Option<&UpdateError> {
        self.failure.as_ref()
    }

    fn request_url(&self) -> String {
        let url = self.remote.request_url(&version_file_name(&self.package));
        if self.append_time_ticks {
            let ticks = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
            format!("{}?t={}", url, ticks)
        } else {
            url
        }
    }

    fn fail(&mut self, error: UpdateError) {
        warn!(package = %self.package, error = %error, "Version request failed");
        self.error = Some(error.to_string());
        self.failure = Some(error);
        self.status = OperationStatus::Failed;
        self.step = VersionStep::Done;
    }
}

impl AsyncOperation for UpdatePackageVersionOperation {
    fn update(&mut self) {
        match self.step {
            VersionStep::None => {
                self.status = OperationStatus::Processing;
                self.step = VersionStep::Request;
            }
            VersionStep::Request => {
                let url = self.request_url();
                self.attempts += 1;
                debug!(package = %self.package, url = %url, "Requesting package version");
                match MemoryFetch::start(self.transport.clone(), url, self.timeout) {
                    Ok(fetch) => {
                        self.fetch = Some(fetch);
                        self.step = VersionStep::Wait;
                    }
                    Err(e) => self.fail(e.into()),
                }
            }
            VersionStep::Wait => {
                let Some(fetch) = self.fetch.as_mut() else {
                    return;
                };
                let Some(result) = fetch.poll() else {
                    return;
                };
                let url = fetch.url().to_string();
                self.fetch = None;
                match result {
                    Ok(body) => {
                        let version = String::from_utf8_lossy(&body).trim().to_string();
                        if version.is_empty() {
                            self.fail(UpdateError::EmptyVersion { url });
                        } else if !is_valid_package_version(&version) {
                            self.fail(UpdateError::InvalidVersion(version));
                        } else {
                            debug!(
                                package = %self.package,
                                version = %version,
                                "Package version fetched"
                            );
                            self.version = Some(version);
                            self.status = OperationStatus::Succeed;
                            self.step = VersionStep::Done;
                        }
                    }
                    Err(e) if self.attempts < MAX_REQUEST_ATTEMPTS => {
                        warn!(
                            url = %url,
                            error = %e,
                            "Version request failed, trying other host"
                        );
                        self.step = VersionStep::Request;
                    }
                    Err(e) => self.fail(e.into()),
                }
            }
            VersionStep::Done => {}
        }
    }

    fn status(&self) -> OperationStatus {
        self.status
    }

    fn progress(&self) -> f32 {
        if self.step == VersionStep::Done {
            1.0
        } else {
            0.0
        }
    }

    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}
