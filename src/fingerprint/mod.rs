//! # Call Fingerprinting
//!
//! Derives a stable [`CacheKey`] from an operation's identity and its arguments.
//!
//! ## Key layout
//!
//! ```text
//! sha512( prefix | identity | kind tag [| receiver type]
//!         | positional count | (len | canonical arg)*
//!         | named count      | (name | len | canonical arg)* sorted by name )
//! ```
//!
//! Arguments are encoded through [`canonical::encode`], which tags every value with
//! its type. Named arguments live in a `BTreeMap`, so the key never depends on the
//! order in which they were supplied.
//!
//! ## Usage
//!
//! ```rust
//! use callguard::fingerprint::{CallArgs, Fingerprinter, OperationIdentity};
//!
//! # fn main() -> Result<(), callguard::fingerprint::FingerprintError> {
//! let fingerprinter = Fingerprinter::new("weather-skill");
//! let identity = OperationIdentity::function("weather::forecast");
//! let args = CallArgs::new().arg(&"Berlin")?.kwarg("days", &3u8)?;
//!
//! let key = fingerprinter.fingerprint(&identity, &args, false);
//! assert_eq!(key, fingerprinter.fingerprint(&identity, &args, false));
//! # Ok(())
//! # }
//! ```

pub mod canonical;

use canonical::write_len_prefixed;
use serde::Serialize;
use sha2::{Digest, Sha512};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Length of a cache key digest in bytes
pub const KEY_LEN: usize = 64;

/// Errors raised while fingerprinting a call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FingerprintError {
    /// An argument has no canonical serialized form
    #[error("Unserializable argument ({position}): {reason}")]
    UnserializableArgument { position: String, reason: String },
}

pub type FingerprintResult<T> = Result<T, FingerprintError>;

/// Opaque 512-bit digest identifying one call shape
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; KEY_LEN]);

impl CacheKey {
    /// Hash arbitrary bytes into a key
    pub fn digest(bytes: &[u8]) -> Self {
        let digest = Sha512::digest(bytes);
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&digest);
        CacheKey(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// First 8 bytes in hex, enough to tell keys apart in logs
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.short())
    }
}

/// Whether an operation is a free function or a method bound to a receiver type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Function,
    Method { receiver_type: String },
}

/// Stable identity of a wrapped operation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationIdentity {
    qualified_name: String,
    kind: OperationKind,
}

impl OperationIdentity {
    /// A free function, named by its module-qualified path (e.g. `weather::forecast`)
    pub fn function(qualified_name: impl Into<String>) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            kind: OperationKind::Function,
        }
    }

    /// A method `method` bound to the type at `receiver_type` (e.g. `weather::Client`)
    pub fn method(receiver_type: impl Into<String>, method: &str) -> Self {
        let receiver_type = receiver_type.into();
        Self {
            qualified_name: format!("{receiver_type}::{method}"),
            kind: OperationKind::Method { receiver_type },
        }
    }

    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    pub fn kind(&self) -> &OperationKind {
        &self.kind
    }

    fn write_into(&self, out: &mut Vec<u8>) {
        write_len_prefixed(out, self.qualified_name.as_bytes());
        match &self.kind {
            OperationKind::Function => out.push(b'F'),
            OperationKind::Method { receiver_type } => {
                out.push(b'M');
                write_len_prefixed(out, receiver_type.as_bytes());
            }
        }
    }
}

impl fmt::Display for OperationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name)
    }
}

/// Canonically encoded arguments of one call
///
/// Values are encoded when they are added, so an unserializable argument is
/// reported before the call is ever attempted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallArgs {
    positional: Vec<Vec<u8>>,
    named: BTreeMap<String, Vec<u8>>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument
    pub fn arg<T: Serialize + ?Sized>(mut self, value: &T) -> FingerprintResult<Self> {
        let position = format!("arg {}", self.positional.len());
        let encoded = canonical::encode(value).map_err(|e| {
            FingerprintError::UnserializableArgument {
                position,
                reason: e.to_string(),
            }
        })?;
        self.positional.push(encoded);
        Ok(self)
    }

    /// Add (or replace) a named argument
    pub fn kwarg<T: Serialize + ?Sized>(mut self, name: &str, value: &T) -> FingerprintResult<Self> {
        let encoded = canonical::encode(value).map_err(|e| {
            FingerprintError::UnserializableArgument {
                position: format!("kwarg {name}"),
                reason: e.to_string(),
            }
        })?;
        self.named.insert(name.to_string(), encoded);
        Ok(self)
    }

    pub fn positional_len(&self) -> usize {
        self.positional.len()
    }

    pub fn named_len(&self) -> usize {
        self.named.len()
    }

    fn write_into(&self, out: &mut Vec<u8>, ignore_first_positional: bool) {
        let skip = usize::from(ignore_first_positional && !self.positional.is_empty());
        let positional = &self.positional[skip..];

        out.extend_from_slice(&(positional.len() as u64).to_le_bytes());
        for arg in positional {
            write_len_prefixed(out, arg);
        }

        out.extend_from_slice(&(self.named.len() as u64).to_le_bytes());
        for (name, arg) in &self.named {
            write_len_prefixed(out, name.as_bytes());
            write_len_prefixed(out, arg);
        }
    }
}

/// Conversion of a typed argument tuple into [`CallArgs`]
///
/// Implemented for tuples of `Serialize` values up to arity 8; each element
/// becomes one positional argument.
pub trait IntoCallArgs {
    fn to_call_args(&self) -> FingerprintResult<CallArgs>;
}

impl IntoCallArgs for CallArgs {
    fn to_call_args(&self) -> FingerprintResult<CallArgs> {
        Ok(self.clone())
    }
}

macro_rules! impl_into_call_args {
    ($($name:ident),*) => {
        impl<$($name: Serialize),*> IntoCallArgs for ($($name,)*) {
            #[allow(non_snake_case)]
            fn to_call_args(&self) -> FingerprintResult<CallArgs> {
                let ($($name,)*) = self;
                let args = CallArgs::new();
                $(let args = args.arg($name)?;)*
                Ok(args)
            }
        }
    };
}

impl_into_call_args!();
impl_into_call_args!(A);
impl_into_call_args!(A, B);
impl_into_call_args!(A, B, C);
impl_into_call_args!(A, B, C, D);
impl_into_call_args!(A, B, C, D, E);
impl_into_call_args!(A, B, C, D, E, F);
impl_into_call_args!(A, B, C, D, E, F, G);
impl_into_call_args!(A, B, C, D, E, F, G, H);

/// Derives cache keys for calls, scoped by a service prefix
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    prefix: String,
}

impl Fingerprinter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Compute the key for a call with already encoded arguments
    ///
    /// With `ignore_first_positional` the receiver of a bound method is left out,
    /// so all instances share cache entries.
    pub fn fingerprint(
        &self,
        identity: &OperationIdentity,
        args: &CallArgs,
        ignore_first_positional: bool,
    ) -> CacheKey {
        let mut bytes = Vec::with_capacity(128);
        write_len_prefixed(&mut bytes, self.prefix.as_bytes());
        identity.write_into(&mut bytes);
        args.write_into(&mut bytes, ignore_first_positional);
        CacheKey::digest(&bytes)
    }

    /// Encode `args` and compute the key in one step
    pub fn fingerprint_call<A: IntoCallArgs + ?Sized>(
        &self,
        identity: &OperationIdentity,
        args: &A,
        ignore_first_positional: bool,
    ) -> FingerprintResult<CacheKey> {
        let args = args.to_call_args()?;
        Ok(self.fingerprint(identity, &args, ignore_first_positional))
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_KEY_PREFIX)
    }
}
