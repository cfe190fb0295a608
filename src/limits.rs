//! Hard caps on tenant-controlled input.

pub const MAX_TENANTS: usize = 64;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_SEATS_PER_TENANT: usize = 4_096;
pub const MAX_SEAT_ID_LEN: usize = 32;
pub const MAX_STUDENT_ID_LEN: usize = 64;

/// Rows in a single `INSERT INTO seats ... VALUES (...), (...)`.
pub const MAX_BATCH_SIZE: usize = 512;
