use std::cell::RefCell;
use std::rc::Rc;

use adw::prelude::*;
use chatapp::api::models::Profile;
use chatapp::chat::profile::{ProfileDraft, status_label};
use chatapp::chat::time;
use gtk4 as gtk;

use super::username_setup::pick_image;
use super::{Shell, run_async_to_main};

/// The signed-in user's profile card with inline editing.
pub struct ProfileView {
    root: gtk::Box,
    shell: Rc<Shell>,
    avatar_slot: gtk::Box,
    photo_btn: gtk::Button,
    name_entry: gtk::Entry,
    username_row: adw::ActionRow,
    email_row: adw::ActionRow,
    status_row: adw::ActionRow,
    since_row: adw::ActionRow,
    edit_btn: gtk::Button,
    save_btn: gtk::Button,
    cancel_btn: gtk::Button,
    profile: RefCell<Option<Profile>>,
    draft: RefCell<ProfileDraft>,
    on_saved: RefCell<Option<Box<dyn Fn(&Profile)>>>,
}

impl ProfileView {
    pub fn new(shell: &Rc<Shell>) -> Rc<Self> {
        let root = gtk::Box::new(gtk::Orientation::Vertical, 0);
        let header = adw::HeaderBar::new();
        header.set_title_widget(Some(&gtk::Label::new(Some("Profile"))));
        root.append(&header);

        let clamp = adw::Clamp::builder().maximum_size(520).vexpand(true).build();
        let column = gtk::Box::new(gtk::Orientation::Vertical, 18);
        column.set_margin_top(24);
        column.set_margin_bottom(24);
        column.set_margin_start(12);
        column.set_margin_end(12);

        let avatar_slot = gtk::Box::new(gtk::Orientation::Horizontal, 0);
        avatar_slot.set_halign(gtk::Align::Center);
        column.append(&avatar_slot);
        let photo_btn = gtk::Button::with_label("Change photo");
        photo_btn.set_halign(gtk::Align::Center);
        photo_btn.set_visible(false);
        column.append(&photo_btn);

        let group = adw::PreferencesGroup::new();
        let name_row = adw::ActionRow::builder().title("Full name").build();
        let name_entry = gtk::Entry::new();
        name_entry.set_valign(gtk::Align::Center);
        name_entry.set_placeholder_text(Some("Your name"));
        name_entry.set_editable(false);
        name_entry.set_has_frame(false);
        name_row.add_suffix(&name_entry);
        let username_row = adw::ActionRow::builder().title("Username").build();
        let email_row = adw::ActionRow::builder().title("Email").build();
        let status_row = adw::ActionRow::builder().title("Status").build();
        let since_row = adw::ActionRow::builder().title("Member since").build();
        group.add(&name_row);
        group.add(&username_row);
        group.add(&email_row);
        group.add(&status_row);
        group.add(&since_row);
        column.append(&group);

        let buttons = gtk::Box::new(gtk::Orientation::Horizontal, 8);
        buttons.set_halign(gtk::Align::End);
        let edit_btn = gtk::Button::with_label("Edit Profile");
        let cancel_btn = gtk::Button::with_label("Cancel");
        let save_btn = gtk::Button::with_label("Save");
        save_btn.add_css_class("suggested-action");
        cancel_btn.set_visible(false);
        save_btn.set_visible(false);
        buttons.append(&edit_btn);
        buttons.append(&cancel_btn);
        buttons.append(&save_btn);
        column.append(&buttons);

        clamp.set_child(Some(&column));
        root.append(&clamp);

        let view = Rc::new(Self {
            root,
            shell: shell.clone(),
            avatar_slot,
            photo_btn,
            name_entry,
            username_row,
            email_row,
            status_row,
            since_row,
            edit_btn,
            save_btn,
            cancel_btn,
            profile: RefCell::new(None),
            draft: RefCell::new(ProfileDraft::default()),
            on_saved: RefCell::new(None),
        });

        {
            let weak = Rc::downgrade(&view);
            view.edit_btn.connect_clicked(move |_| {
                if let Some(view) = weak.upgrade() {
                    view.draft.borrow_mut().editing = true;
                    view.render();
                }
            });
        }
        {
            let weak = Rc::downgrade(&view);
            view.cancel_btn.connect_clicked(move |_| {
                if let Some(view) = weak.upgrade() {
                    if let Some(profile) = view.profile.borrow().as_ref() {
                        view.draft.borrow_mut().cancel(profile);
                    }
                    view.render();
                }
            });
        }
        {
            let weak = Rc::downgrade(&view);
            view.save_btn.connect_clicked(move |_| {
                if let Some(view) = weak.upgrade() {
                    view.save();
                }
            });
        }
        {
            let weak = Rc::downgrade(&view);
            view.photo_btn.connect_clicked(move |_| {
                if let Some(view) = weak.upgrade() {
                    view.choose_photo();
                }
            });
        }
        view
    }

    pub fn widget(&self) -> gtk::Widget {
        self.root.clone().upcast()
    }

    pub fn connect_saved<F: Fn(&Profile) + 'static>(&self, f: F) {
        *self.on_saved.borrow_mut() = Some(Box::new(f));
    }

    pub fn load(&self, profile: Option<Profile>) {
        *self.draft.borrow_mut() = profile.as_ref().map(ProfileDraft::from_profile).unwrap_or_default();
        *self.profile.borrow_mut() = profile;
        self.render();
    }

    fn render(&self) {
        let profile = self.profile.borrow();
        let draft = self.draft.borrow();

        while let Some(child) = self.avatar_slot.first_child() {
            self.avatar_slot.remove(&child);
        }
        let mut shown = profile.clone().unwrap_or_default();
        if draft.editing {
            shown.full_name = Some(draft.full_name.clone());
            shown.avatar_url = Some(draft.avatar_url.clone());
        }
        self.avatar_slot.append(&super::avatar(Some(&shown), 96));

        self.name_entry.set_text(&draft.full_name);
        self.name_entry.set_editable(draft.editing);
        self.name_entry.set_has_frame(draft.editing);
        self.photo_btn.set_visible(draft.editing);
        self.edit_btn.set_visible(!draft.editing);
        self.save_btn.set_visible(draft.editing);
        self.cancel_btn.set_visible(draft.editing);

        let Some(p) = profile.as_ref() else { return };
        self.username_row.set_subtitle(&p.handle());
        self.email_row.set_subtitle(p.email.as_deref().unwrap_or(""));
        self.status_row.set_subtitle(status_label(p));
        self.since_row
            .set_subtitle(&p.created_at.map(time::member_since).unwrap_or_default());
    }

    fn save(self: &Rc<Self>) {
        let snapshot = {
            let mut draft = self.draft.borrow_mut();
            draft.full_name = self.name_entry.text().to_string();
            draft.clone()
        };
        self.save_btn.set_sensitive(false);
        let service = self.shell.service.clone();
        let weak = Rc::downgrade(self);
        run_async_to_main(
            async move { service.save_profile(&snapshot).await },
            move |res| {
                let Some(view) = weak.upgrade() else { return };
                view.save_btn.set_sensitive(true);
                match res {
                    Ok(profile) => {
                        if let (Some(p), Some(cb)) = (profile.as_ref(), view.on_saved.borrow().as_ref()) {
                            cb(p);
                        }
                        view.load(profile);
                        view.shell.toast("Profile updated");
                    }
                    Err(e) => view.shell.report("Failed to update profile", &e),
                }
            },
        );
    }

    fn choose_photo(self: &Rc<Self>) {
        let weak = Rc::downgrade(self);
        pick_image(&self.shell.window, move |file_name, bytes| {
            let Some(view) = weak.upgrade() else { return };
            let current = view.draft.borrow().avatar_url.clone();
            view.photo_btn.set_sensitive(false);
            let service = view.shell.service.clone();
            let weak = Rc::downgrade(&view);
            run_async_to_main(
                async move {
                    let replacing = (!current.is_empty()).then_some(current);
                    service.upload_avatar(&file_name, bytes, replacing.as_deref()).await
                },
                move |res| {
                    let Some(view) = weak.upgrade() else { return };
                    view.photo_btn.set_sensitive(true);
                    match res {
                        Ok(url) => {
                            {
                                let mut draft = view.draft.borrow_mut();
                                draft.full_name = view.name_entry.text().to_string();
                                draft.avatar_url = url;
                            }
                            view.render();
                        }
                        Err(e) => view.shell.report("Failed to upload avatar", &e),
                    }
                },
            );
        });
    }
}
