mod ui;

use adw::prelude::*;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let app = adw::Application::builder()
        .application_id("com.example.ChatApp")
        .build();
    app.connect_activate(ui::build_ui);
    app.run();
}
