use std::cell::RefCell;
use std::rc::Rc;

use adw::prelude::*;
use chatapp::chat::username::{CHECK_DEBOUNCE, CheckUpdate, UsernameForm};
use chatapp::utils::Debouncer;
use gtk4 as gtk;
use tokio::sync::mpsc;

use super::{RUNTIME, Shell, run_async_to_main};

fn render(form: &UsernameForm, status: &gtk::Label, submit: &gtk::Button) {
    status.remove_css_class("success");
    status.remove_css_class("error");
    status.remove_css_class("dim-label");
    match form.status() {
        Some(s) => {
            status.set_label(s.message);
            status.add_css_class(match s.valid {
                Some(true) => "success",
                Some(false) => "error",
                None => "dim-label",
            });
        }
        None => status.set_label(""),
    }
    submit.set_sensitive(form.can_submit());
}

pub fn page(shell: &Rc<Shell>) -> gtk::Widget {
    let form = Rc::new(RefCell::new(UsernameForm::new()));
    let uploaded: Rc<RefCell<Option<String>>> = Rc::new(RefCell::new(None));
    let debouncer = Rc::new(Debouncer::new(CHECK_DEBOUNCE, RUNTIME.handle().clone()));

    let root = gtk::Box::new(gtk::Orientation::Vertical, 0);
    let header = adw::HeaderBar::new();
    header.set_title_widget(Some(&gtk::Label::new(Some("Set up your profile"))));
    root.append(&header);

    let clamp = adw::Clamp::builder().maximum_size(420).vexpand(true).build();
    let column = gtk::Box::new(gtk::Orientation::Vertical, 12);
    column.set_valign(gtk::Align::Center);
    column.set_margin_start(24);
    column.set_margin_end(24);

    let title = gtk::Label::new(Some("Choose a username"));
    title.add_css_class("title-1");
    column.append(&title);
    let subtitle = gtk::Label::new(Some("This is how other people will find you"));
    subtitle.add_css_class("dim-label");
    column.append(&subtitle);

    let user = shell.service.state().user;
    let provider_avatar = user.as_ref().and_then(|u| u.user_metadata.preferred_avatar());
    let display = user.as_ref().and_then(|u| u.user_metadata.preferred_full_name()).unwrap_or_default();
    let avatar = adw::Avatar::new(96, Some(&display), true);
    if let Some(url) = provider_avatar {
        super::load_avatar(&avatar, url);
    }
    column.append(&avatar);

    let photo_btn = gtk::Button::with_label("Upload photo");
    photo_btn.set_halign(gtk::Align::Center);
    column.append(&photo_btn);

    let entry = gtk::Entry::new();
    entry.set_placeholder_text(Some("Username"));
    column.append(&entry);

    let status = gtk::Label::new(None);
    status.set_halign(gtk::Align::Start);
    column.append(&status);

    let submit = gtk::Button::with_label("Continue");
    submit.add_css_class("suggested-action");
    submit.set_sensitive(false);
    column.append(&submit);

    clamp.set_child(Some(&column));
    root.append(&clamp);

    // Availability answers come back from the runtime over this channel.
    let (check_tx, mut check_rx) = mpsc::unbounded_channel::<CheckUpdate>();
    {
        let shell = shell.clone();
        let form = form.clone();
        let status = status.clone();
        let submit = submit.clone();
        glib::spawn_future_local(async move {
            while let Some(update) = check_rx.recv().await {
                let failed = form.borrow_mut().apply_check(update);
                render(&form.borrow(), &status, &submit);
                if failed {
                    shell.toast("Failed to check username availability");
                }
            }
        });
    }

    {
        let form = form.clone();
        let status = status.clone();
        let submit = submit.clone();
        let service = shell.service.clone();
        entry.connect_changed(move |entry| {
            let schedule = form.borrow_mut().set_input(&entry.text());
            if schedule {
                let name = form.borrow().candidate().to_string();
                let service = service.clone();
                let tx = check_tx.clone();
                debouncer.call(async move {
                    let _ = tx.send(CheckUpdate::Started(name.clone()));
                    let available = match service.check_username(&name).await {
                        Ok(available) => Some(available),
                        Err(e) => {
                            log::warn!("username check failed: {e}");
                            None
                        }
                    };
                    let _ = tx.send(CheckUpdate::Finished(name, available));
                });
            } else {
                debouncer.cancel();
            }
            render(&form.borrow(), &status, &submit);
        });
    }

    {
        let shell = shell.clone();
        let uploaded = uploaded.clone();
        let avatar = avatar.clone();
        photo_btn.connect_clicked(move |btn| {
            let shell = shell.clone();
            let uploaded = uploaded.clone();
            let avatar = avatar.clone();
            let btn = btn.clone();
            pick_image(&shell.window.clone(), move |file_name, bytes| {
                btn.set_sensitive(false);
                let service = shell.service.clone();
                let shell = shell.clone();
                let btn = btn.clone();
                let avatar = avatar.clone();
                let uploaded = uploaded.clone();
                run_async_to_main(
                    async move { service.upload_avatar(&file_name, bytes, None).await },
                    move |res| {
                        btn.set_sensitive(true);
                        match res {
                            Ok(url) => {
                                super::load_avatar(&avatar, url.clone());
                                *uploaded.borrow_mut() = Some(url);
                            }
                            Err(e) => shell.report("Failed to upload avatar", &e),
                        }
                    },
                );
            });
        });
    }

    {
        let shell = shell.clone();
        let status = status.clone();
        submit.connect_clicked(move |btn| {
            let snapshot = form.borrow().clone();
            if !snapshot.can_submit() {
                return;
            }
            form.borrow_mut().set_submitting(true);
            btn.set_sensitive(false);
            let avatar_url = uploaded.borrow().clone();
            let service = shell.service.clone();
            let shell = shell.clone();
            let form = form.clone();
            let status = status.clone();
            let btn = btn.clone();
            run_async_to_main(
                async move { service.create_profile(&snapshot, avatar_url.as_deref()).await },
                move |res| match res {
                    Ok(phase) => shell.show_phase(phase),
                    Err(e) => {
                        form.borrow_mut().set_submitting(false);
                        render(&form.borrow(), &status, &btn);
                        shell.report("Failed to create profile", &e);
                    }
                },
            );
        });
    }

    root.upcast()
}

/// Ask for an image file and hand its name and contents to `on_chosen`.
#[allow(deprecated)]
pub fn pick_image<F>(parent: &adw::ApplicationWindow, on_chosen: F)
where
    F: Fn(String, Vec<u8>) + 'static,
{
    let chooser = gtk::FileChooserNative::new(
        Some("Choose a picture"),
        Some(parent),
        gtk::FileChooserAction::Open,
        Some("Open"),
        Some("Cancel"),
    );
    let filter = gtk::FileFilter::new();
    filter.set_name(Some("Images"));
    filter.add_mime_type("image/*");
    chooser.add_filter(&filter);

    // Native dialogs are not owned by GTK; hold it until it answers.
    let held = Rc::new(RefCell::new(Some(chooser.clone())));
    chooser.connect_response(move |chooser, response| {
        if response == gtk::ResponseType::Accept {
            if let Some(path) = chooser.file().and_then(|f| f.path()) {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "avatar.png".to_string());
                match std::fs::read(&path) {
                    Ok(bytes) => on_chosen(name, bytes),
                    Err(e) => log::warn!("cannot read {}: {e}", path.display()),
                }
            }
        }
        held.borrow_mut().take();
    });
    chooser.show();
}
