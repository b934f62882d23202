use super::*;

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct General {
    // address the viewer listens on
    #[serde(default = "listen")]
    listen: String,

    // heading shown above the charts
    #[serde(default = "title")]
    title: String,
}

impl Default for General {
    fn default() -> Self {
        Self {
            listen: listen(),
            title: title(),
        }
    }
}

impl General {
    pub fn check(&self) -> Result<(), String> {
        self.listen().map(|_| ())
    }

    pub fn listen(&self) -> Result<SocketAddr, String> {
        self.listen
            .to_socket_addrs()
            .map_err(|e| format!("bad listen address: {e}"))?
            .next()
            .ok_or_else(|| "could not resolve listen address".to_string())
    }

    pub fn title(&self) -> &str {
        &self.title
    }
}
