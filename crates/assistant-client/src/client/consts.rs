pub const BASE_URL: &str = "https://ai-voice-assistant-backend-072o.onrender.com/bot";
pub const CHAT_PATH: &str = "/generate/response/v1/";
pub const HEALTH_PATH: &str = "/health/check/v1";

pub const ACCEPT_HEADER: &str = "Accept";
pub const JSON_CONTENT_TYPE: &str = "application/json";
