pub mod chat_view;
pub mod login;
pub mod main_window;
pub mod profile_view;
pub mod sidebar;
pub mod username_setup;

use std::future::Future;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use adw::prelude::*;
use chatapp::api::models::Profile;
use chatapp::chat::{ChatService, Phase};
use gtk4 as gtk;
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};

pub static RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime")
});

pub fn spawn_async<F>(fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    RUNTIME.spawn(fut);
}

/// Run `fut` on the tokio runtime and hand its output to `on_done` on the
/// GTK main loop.
pub fn run_async_to_main<T, Fut, C>(fut: Fut, on_done: C)
where
    T: Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
    C: FnOnce(T) + 'static,
{
    let (tx, rx) = tokio::sync::oneshot::channel();
    spawn_async(async move {
        let _ = tx.send(fut.await);
    });
    glib::spawn_future_local(async move {
        if let Ok(value) = rx.await {
            on_done(value);
        }
    });
}

/// The top-level window: one stack page per session phase.
pub struct Shell {
    pub window: adw::ApplicationWindow,
    pub overlay: adw::ToastOverlay,
    stack: gtk::Stack,
    pub service: Arc<ChatService>,
}

impl Shell {
    pub fn show_phase(self: &Rc<Self>, phase: Phase) {
        log::debug!("showing {phase:?}");
        match phase {
            Phase::Loading => self.swap("loading", &loading_page()),
            Phase::SignedOut => self.swap("landing", &login::page(self)),
            Phase::NeedsUsername => self.swap("username", &username_setup::page(self)),
            Phase::Ready => self.swap("main", &main_window::page(self)),
        }
    }

    fn swap(&self, name: &str, page: &gtk::Widget) {
        if let Some(old) = self.stack.child_by_name(name) {
            self.stack.remove(&old);
        }
        self.stack.add_named(page, Some(name));
        self.stack.set_visible_child_name(name);
    }

    pub fn toast(&self, message: &str) {
        self.overlay.add_toast(adw::Toast::new(message));
    }

    pub fn report(&self, context: &str, err: &chatapp::Error) {
        log::warn!("{context}: {err}");
        self.toast(&format!("{context}: {err}"));
    }
}

fn loading_page() -> gtk::Widget {
    let spinner = gtk::Spinner::new();
    spinner.set_spinning(true);
    spinner.set_size_request(48, 48);
    spinner.set_halign(gtk::Align::Center);
    spinner.set_valign(gtk::Align::Center);
    spinner.upcast()
}

pub fn build_ui(app: &adw::Application) {
    let window = adw::ApplicationWindow::builder()
        .application(app)
        .title("ChatApp")
        .default_width(1024)
        .default_height(680)
        .build();

    let overlay = adw::ToastOverlay::new();
    let stack = gtk::Stack::new();
    stack.set_transition_type(gtk::StackTransitionType::Crossfade);
    overlay.set_child(Some(&stack));
    window.set_content(Some(&overlay));

    let service = match ChatService::from_default_config() {
        Ok(service) => service,
        Err(e) => {
            log::error!("cannot start: {e}");
            let page = adw::StatusPage::builder()
                .icon_name("dialog-error-symbolic")
                .title("ChatApp is not configured")
                .description(e.to_string())
                .build();
            stack.add_named(&page, Some("error"));
            window.present();
            return;
        }
    };

    {
        let service = service.clone();
        window.connect_close_request(move |_| {
            let service = service.clone();
            let _ = RUNTIME.block_on(async move {
                tokio::time::timeout(Duration::from_secs(2), service.go_offline()).await
            });
            glib::Propagation::Proceed
        });
    }

    let shell = Rc::new(Shell { window: window.clone(), overlay, stack, service: service.clone() });
    shell.show_phase(Phase::Loading);
    window.present();

    run_async_to_main(async move { service.restore().await }, move |res| match res {
        Ok(phase) => shell.show_phase(phase),
        Err(e) => {
            shell.report("Could not restore your session", &e);
            shell.show_phase(Phase::SignedOut);
        }
    });
}

/// An avatar showing `profile`'s initials, replaced by the remote image once
/// it has been downloaded.
pub fn avatar(profile: Option<&Profile>, size: i32) -> adw::Avatar {
    let name = profile.map(Profile::display_name).unwrap_or("");
    let avatar = adw::Avatar::new(size, Some(name), true);
    if let Some(url) = profile.and_then(|p| p.avatar_url.clone()).filter(|u| !u.is_empty()) {
        load_avatar(&avatar, url);
    }
    avatar
}

fn avatar_cache_path(url: &str) -> Option<PathBuf> {
    let dirs = directories::ProjectDirs::from("com", "example", "ChatApp")?;
    let digest = Sha256::digest(url.as_bytes());
    let name: String = digest.iter().take(16).map(|b| format!("{b:02x}")).collect();
    Some(dirs.cache_dir().join("avatars").join(name))
}

pub fn load_avatar(avatar: &adw::Avatar, url: String) {
    let Some(path) = avatar_cache_path(&url) else { return };
    if path.exists() {
        set_avatar_file(avatar, &path);
        return;
    }
    let avatar = avatar.clone();
    let target = path.clone();
    run_async_to_main(
        async move {
            let bytes = reqwest::get(&url).await?.error_for_status()?.bytes().await?;
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, &bytes)?;
            Ok::<_, chatapp::Error>(())
        },
        move |res| match res {
            Ok(()) => set_avatar_file(&avatar, &path),
            Err(e) => log::debug!("avatar download failed: {e}"),
        },
    );
}

fn set_avatar_file(avatar: &adw::Avatar, path: &std::path::Path) {
    match gtk::gdk::Texture::from_file(&gtk::gio::File::for_path(path)) {
        Ok(texture) => avatar.set_custom_image(Some(&texture)),
        Err(e) => log::debug!("unreadable avatar {}: {e}", path.display()),
    }
}
