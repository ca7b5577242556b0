use std::sync::{Arc, RwLock};

use nalgebra::Isometry3;

use crate::{
    tf_buffer::{FrameTransform, TfBuffer},
    tf_error::TfError,
    LookupTransform,
};

/// Shared handle to a [`TfBuffer`].
///
/// Clones share the same buffer, so one clone can be fed by whatever receives transforms while
/// another answers lookups for the synchronizer.
#[derive(Clone, Debug, Default)]
pub struct TfListener {
    buffer: Arc<RwLock<TfBuffer>>,
}

impl TfListener {
    /// Create a new TfListener
    pub fn new() -> Self {
        Self::new_with_buffer(TfBuffer::new())
    }

    pub fn new_with_buffer(tf_buffer: TfBuffer) -> Self {
        TfListener {
            buffer: Arc::new(RwLock::new(tf_buffer)),
        }
    }

    /// Feeds a batch of transforms into the shared buffer.
    pub fn handle_incoming_transforms(
        &self,
        transforms: impl IntoIterator<Item = FrameTransform>,
    ) -> Result<(), TfError> {
        self.buffer
            .write()
            .map_err(|_| TfError::CouldNotAcquireLock)?
            .handle_incoming_transforms(transforms)
    }

    /// Looks up the latest pose of `to` expressed in `from`.
    pub fn lookup_transform(&self, from: &str, to: &str) -> Result<Isometry3<f64>, TfError> {
        self.buffer
            .read()
            .map_err(|_| TfError::CouldNotAcquireLock)?
            .lookup_transform(from, to)
    }
}

impl LookupTransform for TfListener {
    fn lookup_transform(&self, from: &str, to: &str) -> Result<Isometry3<f64>, TfError> {
        TfListener::lookup_transform(self, from, to)
    }
}
