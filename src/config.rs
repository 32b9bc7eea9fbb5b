pub mod settings;

pub use settings::{
    ComposeSettings, IgniteSettings, ImageSettings, RemoteSettings, RuntimeSettings, Settings,
    WorkloadSettings,
};

pub fn generate_default_config() -> Settings {
    Settings::default()
}
