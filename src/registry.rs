use crate::session::{
    AcquisitionError,
    OpenError,
    StatisticsSnapshot,
    StreamSession,
    StreamSetupError,
};
use std::fmt;
use stream_tester_device::{
    DeviceBackend,
    DeviceSource,
};

/// Why a device was left out of the registry.
#[derive(thiserror::Error, Debug)]
pub enum ConfigureError {
    #[error(transparent)]
    Open(#[from] OpenError),
    #[error(transparent)]
    StreamSetup(#[from] StreamSetupError),
}

#[derive(Debug)]
pub struct BuildFailure {
    /// The source as given, since a failed open has no device name.
    pub device: String,
    pub error: ConfigureError,
}

#[derive(Debug)]
pub struct SessionFailure {
    pub name: String,
    pub error: AcquisitionError,
}

/// Every failure of one `start_all` or `stop_all` pass.
#[derive(thiserror::Error, Debug)]
#[error("failed to {operation} {} of {total} devices: {}", .failures.len(), FailureList(.failures))]
pub struct BulkError {
    pub operation: &'static str,
    pub failures: Vec<SessionFailure>,
    pub total: usize,
}

struct FailureList<'a>(&'a [SessionFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, failure) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", failure.error)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    pub prefer_largest: bool,
}

/// The configured sessions plus the devices that did not make it.
#[derive(Debug)]
pub struct BuildOutcome {
    pub registry: SessionRegistry,
    pub failures: Vec<BuildFailure>,
}

/// Sessions that are set up and ready to stream, in source order.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Vec<StreamSession>,
}

impl SessionRegistry {
    pub fn build(backend: &dyn DeviceBackend, sources: &[DeviceSource], options: &BuildOptions) -> BuildOutcome {
        let mut sessions = Vec::with_capacity(sources.len());
        let mut failures = Vec::new();

        for source in sources {
            match Self::configure(backend, source, options) {
                Ok(session) => sessions.push(session),
                Err(error) => {
                    warn!(device = %source, "Skipping device: {error}");
                    failures.push(BuildFailure {
                        device: source.to_string(),
                        error,
                    });
                }
            }
        }

        info!(configured = sessions.len(), failed = failures.len(), "Configured devices");
        BuildOutcome {
            registry: Self { sessions },
            failures,
        }
    }

    fn configure(
        backend: &dyn DeviceBackend,
        source: &DeviceSource,
        options: &BuildOptions,
    ) -> Result<StreamSession, ConfigureError> {
        let mut session = StreamSession::open(backend, source)?;
        session.negotiate_format(options.prefer_largest);
        session.setup_stream()?;
        Ok(session)
    }

    pub fn start_all(&mut self) -> Result<(), BulkError> {
        self.for_each_session("start", StreamSession::start)
    }

    pub fn stop_all(&mut self) -> Result<(), BulkError> {
        self.for_each_session("stop", StreamSession::stop)
    }

    fn for_each_session(
        &mut self,
        operation: &'static str,
        f: impl Fn(&mut StreamSession) -> Result<(), AcquisitionError>,
    ) -> Result<(), BulkError> {
        let failures = self
            .sessions
            .iter_mut()
            .filter_map(|session| {
                f(session).err().map(|error| SessionFailure {
                    name: session.name().to_string(),
                    error,
                })
            })
            .collect::<Vec<_>>();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(BulkError {
                operation,
                failures,
                total: self.sessions.len(),
            })
        }
    }

    pub fn sessions(&self) -> &[StreamSession] {
        &self.sessions
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamSession> {
        self.sessions.iter()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Takes one snapshot per session, in registry order.
    pub fn snapshot_all(&self) -> Vec<(String, StatisticsSnapshot)> {
        self.sessions
            .iter()
            .map(|session| (session.name().to_string(), session.snapshot_statistics()))
            .collect()
    }
}

impl<'a> IntoIterator for &'a SessionRegistry {
    type Item = &'a StreamSession;
    type IntoIter = std::slice::Iter<'a, StreamSession>;

    fn into_iter(self) -> Self::IntoIter {
        self.sessions.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use pretty_assertions::assert_eq;
    use stream_tester_device::sim::{
        SimulatedBackend,
        SimulatedDeviceSpec,
    };

    fn three_devices(configure: impl FnOnce(&mut SimulatedDeviceSpec)) -> SimulatedBackend {
        let mut specs = vec![
            SimulatedDeviceSpec::new("DMK 33UX250", "1", 64, 64),
            SimulatedDeviceSpec::new("DMK 33UX250", "2", 64, 64),
            SimulatedDeviceSpec::new("DMK 33UX250", "3", 64, 64),
        ];
        configure(&mut specs[1]);
        SimulatedBackend::new(specs)
    }

    fn discovered(backend: &SimulatedBackend) -> Vec<DeviceSource> {
        backend
            .enumerate_devices()
            .unwrap()
            .into_iter()
            .map(DeviceSource::Discovered)
            .collect()
    }

    fn names(registry: &SessionRegistry) -> Vec<&str> {
        registry.iter().map(StreamSession::name).collect()
    }

    #[test]
    fn failed_open_is_excluded_and_order_kept() {
        let backend = three_devices(|spec| spec.fail_open = true);
        let outcome = SessionRegistry::build(&backend, &discovered(&backend), &BuildOptions::default());

        assert_eq!(names(&outcome.registry), vec!["DMK 33UX250 (1)", "DMK 33UX250 (3)"]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].device, "DMK 33UX250_2");
        assert!(matches!(outcome.failures[0].error, ConfigureError::Open(_)));
    }

    #[test]
    fn failed_stream_setup_is_excluded() {
        let backend = three_devices(|spec| spec.fail_stream_setup = true);
        let outcome = SessionRegistry::build(&backend, &discovered(&backend), &BuildOptions::default());

        assert_eq!(outcome.registry.len(), 2);
        assert!(matches!(outcome.failures[0].error, ConfigureError::StreamSetup(_)));
        assert!(outcome
            .registry
            .iter()
            .all(|session| session.state() == SessionState::Configured));
        // the rejected device was released again
        assert!(!backend.handle("2").unwrap().is_claimed());
    }

    #[test]
    fn start_all_continues_past_failures() {
        let backend = three_devices(|spec| spec.fail_start = true);
        let mut registry = SessionRegistry::build(&backend, &discovered(&backend), &BuildOptions::default()).registry;

        let err = registry.start_all().unwrap_err();
        assert_eq!(err.operation, "start");
        assert_eq!(err.total, 3);
        assert_eq!(err.failures.len(), 1);
        assert_eq!(err.failures[0].name, "DMK 33UX250 (2)");
        assert!(err.to_string().starts_with("failed to start 1 of 3 devices"));

        let states = registry.iter().map(StreamSession::state).collect::<Vec<_>>();
        assert_eq!(
            states,
            vec![SessionState::Streaming, SessionState::Configured, SessionState::Streaming]
        );
        assert!(backend.handle("1").unwrap().is_acquiring());
        assert!(backend.handle("3").unwrap().is_acquiring());

        registry.stop_all().unwrap();
        assert!(!backend.handle("1").unwrap().is_acquiring());
    }

    #[test]
    fn snapshot_all_follows_registry_order() {
        let backend = three_devices(|_| {});
        let mut registry = SessionRegistry::build(&backend, &discovered(&backend), &BuildOptions::default()).registry;
        registry.start_all().unwrap();
        backend.handle("3").unwrap().deliver_frames(5);

        let snapshots = registry.snapshot_all();
        let delivered = snapshots
            .iter()
            .map(|(name, snapshot)| (name.as_str(), snapshot.stream.device_delivered))
            .collect::<Vec<_>>();
        assert_eq!(
            delivered,
            vec![("DMK 33UX250 (1)", 0), ("DMK 33UX250 (2)", 0), ("DMK 33UX250 (3)", 5)]
        );
    }

    #[test]
    fn empty_sources_build_an_empty_registry() {
        let backend = three_devices(|_| {});
        let mut outcome = SessionRegistry::build(&backend, &[], &BuildOptions::default());
        assert!(outcome.registry.is_empty());
        assert!(outcome.failures.is_empty());
        outcome.registry.start_all().unwrap();
        assert!(outcome.registry.snapshot_all().is_empty());
    }
}
