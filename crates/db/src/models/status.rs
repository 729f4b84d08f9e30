//! Status helper enums mapping to SMALLINT lookup tables.
//!
//! Each enum variant's discriminant matches the seed data order (1-based)
//! in the corresponding `*_statuses` database table.

/// Status ID type matching SMALLINT in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Resolve a database status ID, `None` for unknown IDs.
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $( $val => Some(Self::$variant), )+
                    _ => None,
                }
            }

            /// Upper-case label as exposed over the API.
            pub fn label(self) -> &'static str {
                match self {
                    $( Self::$variant => $label, )+
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.label())
            }
        }
    };
}

define_status_enum! {
    /// Render worker health.
    WorkerStatus {
        Unknown = 1 => "UNKNOWN",
        Healthy = 2 => "HEALTHY",
        Unhealthy = 3 => "UNHEALTHY",
    }
}

define_status_enum! {
    /// Task lifecycle. COMPLETE and FAILED are terminal.
    TaskStatus {
        Pending = 1 => "PENDING",
        Generating = 2 => "GENERATING",
        Complete = 3 => "COMPLETE",
        Failed = 4 => "FAILED",
    }
}

define_status_enum! {
    /// One drawn prompt's render lifecycle.
    RenderUnitStatus {
        Pending = 1 => "PENDING",
        Running = 2 => "RUNNING",
        Done = 3 => "DONE",
        Failed = 4 => "FAILED",
    }
}

define_status_enum! {
    /// Whether a batch has an accepted annotation.
    AnnotationStatus {
        Unannotated = 1 => "UNANNOTATED",
        Annotated = 2 => "ANNOTATED",
    }
}

impl TaskStatus {
    /// Whether no further transition is allowed.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}
