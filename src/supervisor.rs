//! Update supervisor
//!
//! The long-lived admission gate in front of [`UpdateSession`]. A device
//! owns exactly one supervisor; the supervisor admits at most one session
//! at a time, and a second start attempt is rejected rather than queued.
//!
//! There is no global state here: all coordination hangs off the supervisor
//! value the caller holds, so hosting several independent update domains
//! (or several supervisors in one test) works without interference.

use core::sync::atomic::{AtomicBool, Ordering};

use embedded_hal_async::delay::DelayNs;

use crate::{
    power::DevicePower,
    request::UpdateRequest,
    session::{SessionReport, UpdateSession},
    source::ImageSource,
    storage::SlotWriter,
    transform::{DecryptProvider, DecryptTransform, Identity, NoDecrypt, TransformError},
    validate::ImageValidator,
};

/// Error type of the transform a provider mints
pub type ProviderError<P> =
    <<P as DecryptProvider>::Transform as DecryptTransform>::Error;

/// Why a start attempt was refused
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, PartialEq)]
pub enum StartError<TE> {
    /// A session is already in flight. The attempt is dropped, not queued.
    AlreadyRunning,
    /// The decrypt provider rejected the key material
    Decrypt(TransformError<TE>),
}

/// The per-session externals a caller supplies at start time.
///
/// These are owned by the session for its whole lifetime and released when
/// it reaches a terminal phase.
pub struct SessionParts<S, W, V, D, R> {
    pub source: S,
    pub writer: W,
    pub validator: V,
    pub delay: D,
    pub power: R,
}

/// Clears the busy flag when the admitted session ends (on any path,
/// including panic unwind on hosted targets).
struct SessionGuard<'a> {
    active: &'a AtomicBool,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Admission gate and session factory
pub struct UpdateSupervisor<P = NoDecrypt> {
    active: AtomicBool,
    decrypt: P,
}

impl UpdateSupervisor<NoDecrypt> {
    pub const fn new() -> Self {
        Self::with_decrypt(NoDecrypt)
    }
}

impl Default for UpdateSupervisor<NoDecrypt> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: DecryptProvider> UpdateSupervisor<P> {
    pub const fn with_decrypt(decrypt: P) -> Self {
        Self {
            active: AtomicBool::new(false),
            decrypt,
        }
    }

    /// Whether a session is currently in flight.
    ///
    /// Diagnostic only; racing this against `start` is exactly what the
    /// admission gate exists to make safe.
    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn admit(&self) -> Result<SessionGuard<'_>, ()> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(());
        }
        Ok(SessionGuard {
            active: &self.active,
        })
    }

    /// Admit an unencrypted update session.
    ///
    /// On success the returned [`UpdateRun`] must be driven (typically by
    /// spawning it onto the executor); the supervisor counts as busy until
    /// it finishes.
    pub fn start<S, W, V, D, R>(
        &self,
        request: UpdateRequest,
        parts: SessionParts<S, W, V, D, R>,
    ) -> Result<UpdateRun<'_, S, W, Identity, V, D, R>, StartError<ProviderError<P>>>
    where
        S: ImageSource,
        W: SlotWriter,
        V: ImageValidator,
        D: DelayNs,
        R: DevicePower,
    {
        let guard = self.admit().map_err(|()| StartError::AlreadyRunning)?;
        #[cfg(feature = "defmt")]
        defmt::info!("update admitted: {=str}", request.url());
        Ok(UpdateRun {
            session: UpdateSession::new(
                request.into_url(),
                parts.source,
                parts.writer,
                None,
                parts.validator,
                parts.delay,
                parts.power,
            ),
            _guard: guard,
        })
    }

    /// Admit an encrypted update session.
    ///
    /// The provider mints a fresh transform from `key_material`; if it
    /// refuses, the busy flag is released immediately and the error is
    /// reported to the caller instead of silently killing a task.
    pub fn start_encrypted<S, W, V, D, R>(
        &self,
        request: UpdateRequest,
        key_material: &[u8],
        parts: SessionParts<S, W, V, D, R>,
    ) -> Result<UpdateRun<'_, S, W, P::Transform, V, D, R>, StartError<ProviderError<P>>>
    where
        S: ImageSource,
        W: SlotWriter,
        V: ImageValidator,
        D: DelayNs,
        R: DevicePower,
    {
        let guard = self.admit().map_err(|()| StartError::AlreadyRunning)?;
        let transform = self
            .decrypt
            .create(key_material)
            .map_err(StartError::Decrypt)?;
        #[cfg(feature = "defmt")]
        defmt::info!("encrypted update admitted: {=str}", request.url());
        Ok(UpdateRun {
            session: UpdateSession::new(
                request.into_url(),
                parts.source,
                parts.writer,
                Some(transform),
                parts.validator,
                parts.delay,
                parts.power,
            ),
            _guard: guard,
        })
    }
}

/// An admitted session plus its slot on the supervisor.
///
/// Holds the supervisor busy until dropped or run to completion, so an
/// admitted-but-never-spawned run does not leak the busy flag.
pub struct UpdateRun<'sup, S, W, T, V, D, R> {
    session: UpdateSession<S, W, T, V, D, R>,
    _guard: SessionGuard<'sup>,
}

impl<S, W, T, V, D, R> UpdateRun<'_, S, W, T, V, D, R>
where
    S: ImageSource,
    W: SlotWriter,
    T: DecryptTransform,
    V: ImageValidator,
    D: DelayNs,
    R: DevicePower,
{
    /// Drive the session to its terminal phase, then release the
    /// supervisor.
    pub async fn run(self) -> SessionReport<S::Error, W::Error, T::Error> {
        let Self {
            session,
            _guard: guard,
        } = self;
        let report = session.run().await;
        drop(guard);
        report
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use std::prelude::rust_2021::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::vec;

    use super::*;
    use crate::request::UpdateRequest;
    use crate::storage::{FlashSlotWriter, SlotRegion};
    use crate::testutils::heap_flash::Flash;
    use crate::testutils::session_support::{
        CountingValidator, InstantDelay, RecordingPower, ScriptedSource, XorProvider,
    };

    const REGION: SlotRegion = SlotRegion {
        base: 4096,
        capacity: 16 * 4096,
    };

    fn parts(
        flash: Flash,
        chunks: vec::Vec<vec::Vec<u8>>,
    ) -> SessionParts<
        ScriptedSource,
        FlashSlotWriter<Flash>,
        CountingValidator,
        InstantDelay,
        RecordingPower,
    > {
        SessionParts {
            source: ScriptedSource::new(chunks),
            writer: FlashSlotWriter::new(flash, REGION),
            validator: CountingValidator::new(Arc::new(AtomicUsize::new(0)), false),
            delay: InstantDelay,
            power: RecordingPower::new(Arc::new(AtomicUsize::new(0))),
        }
    }

    fn flash() -> Flash {
        Flash::new(4096, 32 * 4096)
    }

    #[test]
    fn second_start_is_rejected_while_admitted() {
        let sup = UpdateSupervisor::new();
        let req = UpdateRequest::new("https://updates.example/fw.bin").unwrap();

        let first = sup.start(req.clone(), parts(flash(), vec![]));
        assert!(first.is_ok());
        assert!(sup.is_running());

        match sup.start(req, parts(flash(), vec![])) {
            Err(StartError::AlreadyRunning) => {}
            _ => panic!("second start must be rejected"),
        };
    }

    #[test]
    fn dropping_an_admitted_run_releases_the_supervisor() {
        let sup = UpdateSupervisor::new();
        let req = UpdateRequest::new("https://updates.example/fw.bin").unwrap();

        let run = sup.start(req.clone(), parts(flash(), vec![])).unwrap();
        assert!(sup.is_running());
        drop(run);
        assert!(!sup.is_running());

        assert!(sup.start(req, parts(flash(), vec![])).is_ok());
    }

    #[test]
    fn rejected_key_material_releases_the_supervisor() {
        let sup = UpdateSupervisor::with_decrypt(XorProvider);
        let req = UpdateRequest::new("https://updates.example/fw.bin").unwrap();

        // XorProvider refuses an empty key
        match sup.start_encrypted(req.clone(), &[], parts(flash(), vec![])) {
            Err(StartError::Decrypt(TransformError::BadKeyMaterial)) => {}
            _ => panic!("empty key must be rejected"),
        }
        assert!(!sup.is_running());

        assert!(sup
            .start_encrypted(req, &[0xA5], parts(flash(), vec![]))
            .is_ok());
    }

    #[test]
    fn admitted_runs_start_in_fetching() {
        let sup = UpdateSupervisor::new();
        let req = UpdateRequest::new("https://updates.example/fw.bin").unwrap();

        let run = sup.start(req, parts(flash(), vec![])).unwrap();
        assert_eq!(run.session.phase(), crate::session::Phase::Fetching);
    }
}
