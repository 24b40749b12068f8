use std::rc::Rc;
use std::time::Duration;

use adw::prelude::*;
use chatapp::Error;
use gtk4 as gtk;

use super::{Shell, run_async_to_main};

const SIGN_IN_TIMEOUT: Duration = Duration::from_secs(300);

#[allow(deprecated)]
fn open_in_browser(window: &adw::ApplicationWindow, uri: &str) {
    gtk::show_uri(Some(window), uri, gtk::gdk::CURRENT_TIME);
}

pub fn page(shell: &Rc<Shell>) -> gtk::Widget {
    let root = gtk::Box::new(gtk::Orientation::Vertical, 0);
    let header = adw::HeaderBar::new();
    header.set_title_widget(Some(&gtk::Label::new(Some("ChatApp"))));
    root.append(&header);

    let status_page = adw::StatusPage::builder()
        .icon_name("user-available-symbolic")
        .title("Welcome to ChatApp")
        .description("Connect with friends and family through instant messaging")
        .vexpand(true)
        .build();

    let column = gtk::Box::new(gtk::Orientation::Vertical, 12);
    column.set_halign(gtk::Align::Center);

    let login_btn = gtk::Button::with_label("Continue with Google");
    login_btn.add_css_class("suggested-action");
    login_btn.add_css_class("pill");
    column.append(&login_btn);

    let status = gtk::Label::new(None);
    status.add_css_class("dim-label");
    column.append(&status);

    status_page.set_child(Some(&column));
    root.append(&status_page);

    let shell = shell.clone();
    login_btn.connect_clicked(move |btn| {
        let (url, pkce) = match shell.service.authorize() {
            Ok(pair) => pair,
            Err(e) => {
                shell.report("Sign-in failed", &e);
                return;
            }
        };

        btn.set_sensitive(false);
        status.set_label("Finish signing in in your browser…");
        open_in_browser(&shell.window, url.as_str());

        let service = shell.service.clone();
        let shell = shell.clone();
        let btn = btn.clone();
        let status = status.clone();
        run_async_to_main(
            async move {
                let code = tokio::time::timeout(SIGN_IN_TIMEOUT, service.wait_for_code())
                    .await
                    .map_err(|_| Error::Auth("timed out waiting for the browser".into()))??;
                service.finish_sign_in(&code, &pkce).await
            },
            move |res| match res {
                Ok(phase) => shell.show_phase(phase),
                Err(e) => {
                    btn.set_sensitive(true);
                    status.set_label("");
                    shell.report("Sign-in failed", &e);
                }
            },
        );
    });

    root.upcast()
}
