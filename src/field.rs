use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Codec, Config, Error};

thread_local! {
    static FIELD_CODEC: RefCell<Option<Arc<Codec>>> = RefCell::new(None);
}

fn get_or_create_codec() -> Result<Arc<Codec>, Error> {
    FIELD_CODEC.with(|cell| {
        let mut cell = cell.borrow_mut();
        if let Some(codec) = cell.as_ref() {
            Ok(codec.clone())
        } else {
            let config = Config::global().expect("Config::set_global must be called before Field is used");
            let codec = Arc::new(Codec::new(&config)?);
            *cell = Some(codec.clone());
            Ok(codec)
        }
    })
}

pub trait TypeMarker: std::fmt::Debug {
    fn name() -> &'static str;
}

/// A generic type-safe object ID field (a wrapped u64).
///
/// When serialized with Serde, the number is automatically obfuscated into
/// an opaque hex token.  Deserialization deobfuscates the token back to an
/// integer, and a token that cannot be deobfuscated is a deserialization
/// error.  The marker type keeps IDs of different object types from being
/// assigned to each other, even though the tokens themselves carry no type
/// tag.
///
/// This is the declared-mapping way to obfuscate record fields: give the
/// field the `Field<M>` type and the transform happens at the
/// serialization boundary, with no runtime field scanning.
///
/// # Examples
///
/// ```
/// use opaqueid_rs;
/// use serde::{Serialize, Deserialize};
/// use serde_json;
///
/// #[derive(Clone, Copy, Debug)]
/// pub struct ExampleIdMarker;
/// impl opaqueid_rs::TypeMarker for ExampleIdMarker {
///     fn name() -> &'static str { "example" }
/// }
///
/// type ExampleId = opaqueid_rs::Field<ExampleIdMarker>;
///
/// #[derive(serde::Serialize, serde::Deserialize)]
/// struct Example {
///     pub id: ExampleId,
/// }
///
/// let config = opaqueid_rs::Config::with_key(b"an example very very secret key!").unwrap();
/// opaqueid_rs::Config::set_global(config);
///
/// let obj = Example { id: ExampleId::from(12345) };
/// let obj_str = serde_json::to_string(&obj).unwrap();
/// let back: Example = serde_json::from_str(&obj_str).unwrap();
/// assert_eq!(u64::from(back.id), 12345);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Field<T: TypeMarker> {
    id: u64,
    _marker: std::marker::PhantomData<T>,
}

impl<T: TypeMarker> From<Field<T>> for u64 {
    /// Returns the raw `u64` value.
    fn from(field: Field<T>) -> Self {
        field.id
    }
}

impl<T: TypeMarker> fmt::Display for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Field {{ id: {}, marker: {} }}", self.id, T::name())
    }
}

impl<T: TypeMarker> Field<T> {
    /// Creates a `Field<T>` value from a `u64`.
    ///
    /// This method converts a `u64` into a `Field<T>`, effectively changing its type.
    pub fn from(id: u64) -> Self {
        Field {
            id,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T: TypeMarker> Serialize for Field<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let codec = get_or_create_codec().map_err(serde::ser::Error::custom)?;
        let token = codec.obfuscate(self.id).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&token)
    }
}

impl<'de, T: TypeMarker> Deserialize<'de> for Field<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let token = String::deserialize(deserializer)?;
        let codec = get_or_create_codec().map_err(serde::de::Error::custom)?;
        let id = codec.deobfuscate(&token).ok_or_else(|| {
            serde::de::Error::custom(format!("value '{}' cannot be deobfuscated", token))
        })?;
        Ok(Field::from(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug)]
    struct UserIdMarker;
    impl TypeMarker for UserIdMarker {
        fn name() -> &'static str {
            "user"
        }
    }

    type UserId = Field<UserIdMarker>;

    #[derive(Serialize, Deserialize)]
    struct User {
        id: UserId,
    }

    fn set_test_config() {
        Config::set_global(Config::with_key(b"an example very very secret key!").unwrap());
    }

    #[test]
    fn test_serde_round_trip() {
        set_test_config();

        let user = User {
            id: UserId::from(12345),
        };
        let json = serde_json::to_string(&user).unwrap();
        // The field serializes as an opaque hex token, not the raw ID.
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let token = value["id"].as_str().unwrap();
        assert!(token.len() >= 64);
        assert!(token.bytes().all(|b| b.is_ascii_hexdigit()));

        let back: User = serde_json::from_str(&json).unwrap();
        assert_eq!(u64::from(back.id), 12345);
    }

    #[test]
    fn test_undecodable_token_is_an_error() {
        set_test_config();

        let result: Result<User, _> = serde_json::from_str(r#"{"id":"zz"}"#);
        assert!(result.is_err());
    }
}
