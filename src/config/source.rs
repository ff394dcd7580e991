use crate::config::*;

#[derive(Deserialize, Default)]
pub struct Source {
    #[serde(default)]
    enabled: Option<bool>,
}

impl Source {
    pub fn enabled(&self) -> Option<bool> {
        self.enabled
    }
}
