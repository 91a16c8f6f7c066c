//! Provider code translations
//!
//! Maps the numeric `StatusCode` and `ResponseCode` values found in CDRs to
//! readable text. Unknown codes have no translation and callers keep the raw
//! value.

/// SMS delivery status codes reported by the provider
const STATUS_CODES: &[(i64, &str)] = &[
    (0, "Delivered"),
    (-1, "Bad or Unsupported Phone Number"),
    (-2, "Carrier Error"),
    (-3, "Gateway Error"),
    (-4, "Exceeded Rate Limit"),
    (-5, "Duplicate Message"),
    (-7, "Blocked"),
    (-99, "Unknown"),
];

/// HTTP/SIP style response codes. Not exhaustive.
const RESPONSE_CODES: &[(i64, &str)] = &[
    (200, "OK"),
    (400, "Bad Request"),
    (401, "Not Authorized"),
    (403, "Access Denied"),
    (404, "Not Found"),
    (405, "Method Not Allowed"),
    (408, "User Unavailable"),
    (415, "Unsupported Media Type"),
    (484, "Number Unsupported"),
    (487, "Request Terminated"),
    (500, "Internal Server Error"),
    (503, "Service Unavailable"),
    (-1, "Delivered Successfully"),
];

fn lookup(table: &'static [(i64, &'static str)], code: i64) -> Option<&'static str> {
    table.iter().find(|(c, _)| *c == code).map(|(_, text)| *text)
}

/// Human readable text for a numeric `StatusCode`, e.g. `-3` -> `"Gateway Error"`
///
/// `None` for codes outside the table; callers keep the raw number.
pub fn status_text(code: i64) -> Option<&'static str> {
    lookup(STATUS_CODES, code)
}

/// Human readable text for a numeric SIP/HTTP style `ResponseCode`
pub fn response_text(code: i64) -> Option<&'static str> {
    lookup(RESPONSE_CODES, code)
}
