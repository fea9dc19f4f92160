//! `opaqueid` reversibly disguises integer IDs as opaque hex tokens safe to
//! expose in URLs, forms, and templates, and provides a generic field type
//! to conveniently manage the process with Serde.
//!
//! This library is primarily designed to encrypt raw database IDs in your
//! API, so that sequential or guessable numeric keys are never leaked to
//! clients.  Object ID enumeration becomes impractical while you keep the
//! performance benefits of monotonically increasing integers as your
//! database keys.
//!
//! `opaqueid` encrypts the decimal form of the ID with AES-256-CBC under a
//! fresh random IV per token, prepends the IV, and hex-encodes the result.
//! Obfuscating the same ID twice therefore yields different tokens.  On
//! decode, tokens from an earlier key/IV management scheme (a single IV
//! persisted to a side file) are still accepted via an ordered fallback,
//! so upgrading does not invalidate previously issued tokens.
//!
//! The key can be supplied explicitly (32 bytes), derived from a
//! passphrase (SHA-256), or generated once and persisted to a local key
//! store directory.  Please note that leaking the key means you lose all
//! the security benefits: anyone can then decrypt and forge your tokens.
//! You also cannot change the key, unless it's OK that all previously
//! exposed tokens stop resolving.
//!
//! # Usage
//!
//! ## Generic `Field` API (recommended)
//!
//! Use the generic `Field` type to define a type for each type of object
//! you're exposing in your public APIs.  The `Field` type obfuscates on
//! Serde serialization and deobfuscates on deserialization.
//!
//! ```
//! use opaqueid_rs;
//! use serde::{Serialize, Deserialize};
//! use serde_json;
//!
//! // Define the ExampleId field type.
//! #[derive(Debug)]
//! pub struct ExampleIdMarker;
//! impl opaqueid_rs::TypeMarker for ExampleIdMarker {
//!     fn name() -> &'static str { "example" }
//! }
//!
//! type ExampleId = opaqueid_rs::Field<ExampleIdMarker>;
//!
//! #[derive(serde::Serialize, serde::Deserialize)]
//! struct Example {
//!     pub id: ExampleId,
//! }
//!
//! let config = opaqueid_rs::Config::with_key(b"an example very very secret key!").unwrap();
//! opaqueid_rs::Config::set_global(config);
//!
//! let obj = Example { id: ExampleId::from(12345) };
//! let obj_str = serde_json::to_string(&obj).unwrap();
//! let back: Example = serde_json::from_str(&obj_str).unwrap();
//! assert_eq!(u64::from(back.id), 12345);
//! ```
//!
//! ## Low level API
//!
//! `Codec` provides a simple API to obfuscate and deobfuscate integers.
//!
//! ```
//! use opaqueid_rs::{Codec, Config};
//!
//! let config = Config::with_key(b"an example very very secret key!").unwrap();
//! let codec = Codec::new(&config).unwrap();
//!
//! let token = codec.obfuscate(12345).unwrap();
//! assert_eq!(codec.deobfuscate(&token), Some(12345));
//! assert!(codec.is_obfuscated(&token));
//! assert!(!codec.is_obfuscated("zz"));
//! ```

mod codec;
mod config;
mod field;
mod keystore;

pub use codec::{Codec, Error};
pub use config::{Config, ConfigError};
pub use field::{Field, TypeMarker};
pub use keystore::{KeyStore, KeyStoreError};
