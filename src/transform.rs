//! Streaming decrypt transform
//!
//! The decrypt step is a stateful filter between the source and the slot
//! writer: ciphertext chunks go in, zero or more plaintext bytes come out.
//! A transform may buffer internally (block ciphers typically do), so "no
//! output yet" is ordinary data flow, not an error.
//!
//! The cipher primitives themselves live outside this crate; a concrete
//! transform wraps them behind [`DecryptTransform`] and is minted per
//! session from key material by a [`DecryptProvider`].

use core::convert::Infallible;

/// Errors returned by [`DecryptTransform`] implementations
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, PartialEq)]
pub enum TransformError<C> {
    /// The key material could not be used to set up the cipher
    BadKeyMaterial,
    /// The stream ended while the transform still held buffered input
    Truncated,
    /// Error types specific to the implementor
    Custom(C),
}

impl<C> From<C> for TransformError<C> {
    fn from(value: C) -> Self {
        TransformError::Custom(value)
    }
}

/// Output of a single [`DecryptTransform::feed`] call
///
/// `plaintext` borrows from the transform (or the input) and must be
/// consumed before the next `feed`; the borrow checker enforces the
/// single-owner rule for the output buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct TransformOutput<'a> {
    pub plaintext: &'a [u8],
    /// The transform still holds input it could not turn into output yet.
    /// If this is set when the stream ends, the ciphertext was truncated.
    pub in_progress: bool,
}

/// Stateful ciphertext-to-plaintext filter
pub trait DecryptTransform {
    type Error: core::fmt::Debug + PartialEq;

    /// Feed one ciphertext chunk, receiving zero or more plaintext bytes.
    fn feed<'a>(
        &'a mut self,
        ciphertext: &'a [u8],
    ) -> Result<TransformOutput<'a>, TransformError<Self::Error>>;
}

/// Pass-through transform used when no key material is in play.
///
/// Output is byte-for-byte identical to input, so a session running with
/// `Identity` behaves exactly like the unencrypted path.
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

impl DecryptTransform for Identity {
    type Error = Infallible;

    fn feed<'a>(
        &'a mut self,
        ciphertext: &'a [u8],
    ) -> Result<TransformOutput<'a>, TransformError<Infallible>> {
        Ok(TransformOutput {
            plaintext: ciphertext,
            in_progress: false,
        })
    }
}

/// Mints a [`DecryptTransform`] from per-session key material.
///
/// This replaces a caller-supplied decrypt callback: the provider is handed
/// to the supervisor once, and each encrypted session gets a fresh transform
/// owning its own cipher state.
pub trait DecryptProvider {
    type Transform: DecryptTransform;

    fn create(
        &self,
        key_material: &[u8],
    ) -> Result<Self::Transform, TransformError<<Self::Transform as DecryptTransform>::Error>>;
}

/// Provider for deployments without image encryption; every session gets an
/// [`Identity`] transform and key material is ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDecrypt;

impl DecryptProvider for NoDecrypt {
    type Transform = Identity;

    fn create(&self, _key_material: &[u8]) -> Result<Identity, TransformError<Infallible>> {
        Ok(Identity)
    }
}
