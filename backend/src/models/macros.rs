/// Defines a newtype ID wrapper around an integer-like scalar (typically `i64`)
/// and generates:
/// - derives (Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)
/// - `Display`
/// - `From<$inner> for $name` and `From<$name> for $inner`
///
/// Usage:
///   define_id_type!(i64, TargetTableId);
#[macro_export]
macro_rules! define_id_type {
    ($inner:ty, $name:ident) => {
        #[derive(
            Debug,
            Copy,
            Clone,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        pub struct $name(pub $inner);

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                ::std::write!(f, "{}", self.0)
            }
        }

        impl ::std::convert::From<$inner> for $name {
            fn from(v: $inner) -> Self {
                $name(v)
            }
        }

        impl ::std::convert::From<$name> for $inner {
            fn from(v: $name) -> Self {
                v.0
            }
        }

        impl $name {
            pub fn new(value: $inner) -> Self {
                $name(value)
            }

            pub fn value(&self) -> $inner {
                self.0
            }
        }
    };
}

/// Defines a persisted enum whose variants carry a stable short name and a
/// stable database code, and generates:
/// - derives (Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)
/// - `ALL`, `short_name()`, `value_of_short_name()`, `code()`, `from_code()`
/// - `Display` (the short name) and `FromStr` (via `value_of_short_name`)
///
/// Unknown short names and codes produce a
/// [`UnknownShortName`](crate::models::UnknownShortName) error.
///
/// Usage:
///   short_name_enum!(MaskType, "mask type" { Target => ("target", 0), Background => ("background", 1) });
#[macro_export]
macro_rules! short_name_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $label:literal {
            $( $(#[$vmeta:meta])* $variant:ident => ($short:literal, $code:literal) ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Copy,
            Clone,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn short_name(&self) -> &'static str {
                match self {
                    $($name::$variant => $short),+
                }
            }

            pub fn value_of_short_name(
                short_name: &str,
            ) -> ::std::result::Result<Self, $crate::models::UnknownShortName> {
                match short_name {
                    $($short => Ok($name::$variant),)+
                    other => Err($crate::models::UnknownShortName::new($label, other)),
                }
            }

            pub fn code(&self) -> i16 {
                match self {
                    $($name::$variant => $code),+
                }
            }

            pub fn from_code(
                code: i16,
            ) -> ::std::result::Result<Self, $crate::models::UnknownShortName> {
                match code {
                    $($code => Ok($name::$variant),)+
                    other => Err($crate::models::UnknownShortName::new($label, other.to_string())),
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.short_name())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::models::UnknownShortName;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                Self::value_of_short_name(s)
            }
        }
    };
}
