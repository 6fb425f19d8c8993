//! Collaborators owned by the host message-exchange application.
//!
//! The host seals attachments into an ASiC bundle on the way out and takes
//! inbound envelopes (with or without a bundle) on the way in. The bridge
//! only moves bytes between these and the transports.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::attachment::AttachmentStream;
use crate::error::{IntakeError, PackagingError};
use crate::model::{NextMoveOutMessage, ServiceIdentifier, StandardBusinessDocument};

/// Encrypted ASiC archive as produced by the host.
pub type AsicStream = BoxStream<'static, io::Result<Bytes>>;

/// Callback through which packaging failures are reported.
pub trait Reject: Send + Sync {
    fn reject(&self, error: PackagingError);
}

/// Reject callback that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReject;

impl Reject for LogReject {
    fn reject(&self, error: PackagingError) {
        tracing::error!(error = %error, "Error creating ASiC");
    }
}

/// Forwards to another callback and remembers that it fired.
pub(crate) struct TrackingReject<'a> {
    inner: &'a dyn Reject,
    fired: AtomicBool,
}

impl<'a> TrackingReject<'a> {
    pub(crate) fn new(inner: &'a dyn Reject) -> Self {
        Self {
            inner,
            fired: AtomicBool::new(false),
        }
    }

    pub(crate) fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl Reject for TrackingReject<'_> {
    fn reject(&self, error: PackagingError) {
        self.fired.store(true, Ordering::SeqCst);
        self.inner.reject(error);
    }
}

/// Builds the encrypted ASiC bundle for an outbound message.
#[async_trait]
pub trait AsicHandler: Send + Sync {
    /// Package all files of `message`. Failures go to `reject`; the returned
    /// stream is then ignored.
    async fn create_encrypted_asic(
        &self,
        message: &NextMoveOutMessage,
        reject: &dyn Reject,
    ) -> AsicStream;
}

/// The host's inbound pipeline.
#[async_trait]
pub trait NextMoveQueue: Send + Sync {
    /// Take an inbound message together with its ASiC bundle.
    ///
    /// The intake owns `asic` and must read it to the end; the bridge keeps
    /// the blob until it has.
    async fn enqueue_incoming_message(
        &self,
        sbd: &StandardBusinessDocument,
        service: ServiceIdentifier,
        asic: AttachmentStream,
    ) -> Result<(), IntakeError>;

    /// Take an inbound message that carries no attachment.
    async fn enqueue_incoming_status(
        &self,
        sbd: &StandardBusinessDocument,
        service: ServiceIdentifier,
    ) -> Result<(), IntakeError>;
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Collect(Mutex<Vec<String>>);

    impl Reject for Collect {
        fn reject(&self, error: PackagingError) {
            self.0.lock().unwrap().push(error.to_string());
        }
    }

    #[test]
    fn tracking_reject_forwards_and_flags() {
        let inner = Collect::default();
        let tracking = TrackingReject::new(&inner);
        assert!(!tracking.fired());

        tracking.reject(PackagingError::Failed {
            message_id: "m1".into(),
            reason: "no certificate".into(),
        });

        assert!(tracking.fired());
        let seen = inner.0.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("no certificate"));
    }
}
