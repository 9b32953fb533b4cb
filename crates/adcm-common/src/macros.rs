/// Macro to declare a strongly typed integer identifier.
///
/// Every entity of the object graph is addressed by its own id type so a
/// `HostId` cannot be passed where a `ClusterId` is expected.
///
/// # Usage
/// ```ignore
/// define_id!(ClusterId, "cluster");
/// let id = ClusterId(7);
/// assert_eq!(id.to_string(), "7");
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident, $kind:expr) => {
        #[derive(
            Clone,
            Copy,
            Debug,
            Default,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            ::serde::Serialize,
            ::serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Object kind used in error messages
            pub const KIND: &'static str = $kind;

            pub fn value(self) -> u64 {
                self.0
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                $name(value)
            }
        }
    };
}

/// Return early with a typed error when a condition does not hold.
///
/// # Usage
/// ```ignore
/// ensure!(cluster.hosts.len() > 0, AdcmError::Conflict("no hosts".into()));
/// ```
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr $(,)?) => {
        if !$cond {
            return Err($err);
        }
    };
}
