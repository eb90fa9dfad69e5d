// Hard caps on caller-supplied input. Exceeding one is a validation failure,
// never a partial result.

/// Longest stay accepted by availability queries and reservation confirmation.
pub const MAX_STAY_NIGHTS: i64 = 366;

/// Candidate rooms per `available_rooms` call.
pub const MAX_ROOMS_PER_QUERY: usize = 1_000;

/// Field names accepted in one submitted calendar form.
pub const MAX_FORM_FIELDS: usize = 10_000;

pub const MAX_ROOM_NAME_LEN: usize = 256;

/// Calendar months outside this range are rejected.
pub const MIN_YEAR: i32 = 1970;
pub const MAX_YEAR: i32 = 9999;
