use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Deserialize, Debug)]
pub struct RetrieveDatabaseResp {
    pub id: String,
    #[serde(default)]
    pub title: Vec<Value>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

#[derive(Deserialize, Debug)]
pub struct PageResp {
    pub id: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub in_trash: bool,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub icon: Option<Value>,
    #[serde(default)]
    pub cover: Option<Value>,
}

impl PageResp {
    pub fn icon_emoji(&self) -> Option<String> {
        self.icon
            .as_ref()
            .and_then(|i| i["emoji"].as_str())
            .map(str::to_string)
    }

    pub fn cover_url(&self) -> Option<String> {
        let cover = self.cover.as_ref()?;
        cover["external"]["url"]
            .as_str()
            .or_else(|| cover["file"]["url"].as_str())
            .map(str::to_string)
    }
}

/// One page of a cursor-paginated list endpoint.
#[derive(Deserialize, Debug)]
pub struct ListResp {
    pub results: Vec<Value>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct CreatedObject {
    pub id: String,
}
