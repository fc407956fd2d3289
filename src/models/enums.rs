use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(SigningMethod {
    Token => "token",
    CertificateFile => "certificate_file",
    Manual => "manual",
});

str_enum!(AssuranceLevel {
    Qualified => "qualified",
    Advanced => "advanced",
    VisualOnly => "visual_only",
});

str_enum!(PrescriptionFormat {
    Simple => "simple",
    SpecialControl => "special_control",
});

str_enum!(Channel {
    Internal => "internal",
    Email => "email",
    Sms => "sms",
});

str_enum!(DeliveryOutcome {
    Delivered => "delivered",
    Rejected => "rejected",
    Failed => "failed",
});

impl SigningMethod {
    /// Assurance tier recorded in audit entries and printed on stamps.
    pub fn assurance(&self) -> AssuranceLevel {
        match self {
            Self::Token => AssuranceLevel::Qualified,
            Self::CertificateFile => AssuranceLevel::Advanced,
            Self::Manual => AssuranceLevel::VisualOnly,
        }
    }

    pub fn is_cryptographic(&self) -> bool {
        !matches!(self, Self::Manual)
    }
}
