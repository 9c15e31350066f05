//! The payload format stored in the `payload` column.
//!
//! A payload is a JSON object carrying the job's [Job::KIND] tag next to its serialized data:
//!
//! ```json
//! {"kind":"send_reminder","data":{"email":"me@example.com"}}
//! ```
//!
//! Decoding only ever looks the tag up in a [JobRegistry](crate::JobRegistry), so a payload can
//! never name a type that the application did not register.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::{Error, Job, Result};

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    kind: &'a str,
    data: &'a T,
}

#[derive(Deserialize)]
pub(crate) struct Envelope {
    pub kind: String,
    pub data: Box<RawValue>,
}

/// Serialize a job into its payload string.
pub fn encode<J: Job>(job: &J) -> Result<String> {
    serde_json::to_string(&EnvelopeRef {
        kind: J::KIND,
        data: job,
    })
    .map_err(Error::PayloadError)
}

/// Split a payload into its kind tag and raw data, without decoding the data.
pub(crate) fn open(payload: &str) -> Result<Envelope> {
    serde_json::from_str::<Envelope>(payload).map_err(Error::invalid_payload)
}
