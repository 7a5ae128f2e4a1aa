// This is free and unencumbered software released into the public domain.

use super::{CapturePlatform, MediaType, SerialQueue};
use derive_more::Display;
use std::sync::{Arc, Mutex, mpsc::sync_channel};

/// The client's authorization to capture a media type.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum AuthorizationStatus {
    #[display("not determined")]
    NotDetermined,
    #[display("restricted")]
    Restricted,
    #[display("denied")]
    Denied,
    #[display("authorized")]
    Authorized,
}

impl AuthorizationStatus {
    pub fn is_authorized(self) -> bool {
        self == Self::Authorized
    }

    fn from_grant(granted: bool) -> Self {
        if granted {
            Self::Authorized
        } else {
            Self::Denied
        }
    }
}

/// Invoked once with the user's answer; may run on any thread.
pub type AccessCompletion = Box<dyn FnOnce(bool) + Send + 'static>;

/// Resolves authorization for `media`, blocking on the platform's request
/// when the status is not yet determined.
pub fn authorize_blocking(platform: &dyn CapturePlatform, media: MediaType) -> AuthorizationStatus {
    let status = platform.authorization_status(media);
    if status != AuthorizationStatus::NotDetermined {
        return status;
    }

    debug!(%media, "requesting camera access");
    let (tx, rx) = sync_channel::<bool>(1);
    platform.request_access(
        media,
        Box::new(move |granted| {
            let _ = tx.send(granted);
        }),
    );

    match rx.recv() {
        Ok(granted) => AuthorizationStatus::from_grant(granted),
        // The platform dropped the completion without answering.
        Err(_) => AuthorizationStatus::NotDetermined,
    }
}

/// An authorization answer that later work on a serial queue can read.
///
/// While a request is outstanding the queue stays suspended, so any job
/// enqueued behind it observes the final answer.
#[derive(Clone, Debug)]
pub struct PendingAuthorization {
    slot: Arc<Mutex<AuthorizationStatus>>,
}

impl PendingAuthorization {
    pub fn resolved(status: AuthorizationStatus) -> Self {
        Self {
            slot: Arc::new(Mutex::new(status)),
        }
    }

    /// Requests access if needed, holding `queue` suspended until the
    /// platform answers.
    pub fn request(
        platform: &dyn CapturePlatform,
        media: MediaType,
        queue: &Arc<SerialQueue>,
    ) -> Self {
        let status = platform.authorization_status(media);
        if status != AuthorizationStatus::NotDetermined {
            return Self::resolved(status);
        }

        let pending = Self::resolved(AuthorizationStatus::NotDetermined);

        debug!(%media, queue = queue.label(), "requesting camera access");
        queue.suspend();
        let slot = Arc::clone(&pending.slot);
        let queue = Arc::clone(queue);
        platform.request_access(
            media,
            Box::new(move |granted| {
                *slot.lock().unwrap_or_else(|p| p.into_inner()) =
                    AuthorizationStatus::from_grant(granted);
                queue.resume();
            }),
        );

        pending
    }

    pub fn status(&self) -> AuthorizationStatus {
        *self.slot.lock().unwrap_or_else(|p| p.into_inner())
    }
}
