use serde::{Deserialize, Serialize};

use crate::models::Status;
use crate::view::Screen;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "find_chat")]
    FindChat,
    #[serde(rename = "send")]
    Send { content: String },
    #[serde(rename = "load_more")]
    LoadMore,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "welcome")]
    Welcome { identity_id: Option<String> },
    #[serde(rename = "view")]
    View {
        status: Status,
        partner_id: Option<String>,
        #[serde(flatten)]
        screen: Screen,
    },
    #[serde(rename = "error")]
    Error { message: String },
}
