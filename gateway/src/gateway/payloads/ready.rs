use serde::Deserialize;

/// The parts of READY the session needs. Everything else is left to consumers.
#[derive(Deserialize, Debug)]
pub struct Ready {
    pub session_id: String,

    #[serde(default)]
    pub resume_gateway_url: Option<String>,
}
