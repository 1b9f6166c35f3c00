//! PostgreSQL Error Codes
//!
//! SQLSTATE constants the store client classifies on. A code is five characters:
//! two for the class, three for the condition.
//!
//! Full list: <https://www.postgresql.org/docs/current/errcodes-appendix.html>

/// PostgreSQL SQLSTATE error codes
///
/// Only codes that change retry behaviour are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PgErrorCode;

impl PgErrorCode {
    // =========================================================================
    // Class 28: Invalid Authorization Specification
    // =========================================================================

    /// Invalid password - Code 28P01
    pub const INVALID_PASSWORD: &'static str = "28P01";

    /// Invalid authorization specification - Code 28000
    ///
    /// Unknown role, or `pg_hba.conf` rejects the client.
    pub const INVALID_AUTHORIZATION: &'static str = "28000";

    // =========================================================================
    // Class 3D: Invalid Catalog Name
    // =========================================================================

    /// Database does not exist - Code 3D000
    pub const INVALID_CATALOG_NAME: &'static str = "3D000";

    // =========================================================================
    // Class 53: Insufficient Resources
    // =========================================================================

    /// Too many connections - Code 53300
    ///
    /// `max_connections` reached on the server. Other agents release connections
    /// over time, so this is worth waiting out.
    pub const TOO_MANY_CONNECTIONS: &'static str = "53300";

    // =========================================================================
    // Class 57: Operator Intervention
    // =========================================================================

    /// Server is starting up or shutting down - Code 57P03
    pub const CANNOT_CONNECT_NOW: &'static str = "57P03";

    /// Connection terminated by administrator - Code 57P01
    pub const ADMIN_SHUTDOWN: &'static str = "57P01";

    // =========================================================================
    // Class 08: Connection Exception
    // =========================================================================

    pub const CONNECTION_EXCEPTION_CLASS: &'static str = "08";

    // =========================================================================
    // Helper Methods
    // =========================================================================

    #[inline]
    pub fn is_authentication_failure(code: &str) -> bool {
        code == Self::INVALID_PASSWORD || code == Self::INVALID_AUTHORIZATION
    }

    #[inline]
    pub fn is_missing_database(code: &str) -> bool {
        code == Self::INVALID_CATALOG_NAME
    }

    #[inline]
    pub fn is_too_many_connections(code: &str) -> bool {
        code == Self::TOO_MANY_CONNECTIONS
    }

    /// Connection-level failures that a fresh connection may not hit
    #[inline]
    pub fn is_transient_connection_error(code: &str) -> bool {
        code.starts_with(Self::CONNECTION_EXCEPTION_CLASS)
            || code == Self::CANNOT_CONNECT_NOW
            || code == Self::ADMIN_SHUTDOWN
    }
}
