use chrono::Local;
use gtk4 as gtk;
use gtk4::prelude::*;

use chatapp::api::models::{Conversation, Profile};
use chatapp::chat::conversations::{last_seen_caption, other_participant, preview};
use chatapp::chat::time;

/// Conversation list, user search and the signed-in user's footer.
pub struct Sidebar {
    root: gtk::Box,
    pub new_chat_btn: gtk::ToggleButton,
    pub search_bar: gtk::SearchBar,
    pub search_entry: gtk::SearchEntry,
    pub results: gtk::ListBox,
    results_empty: gtk::Label,
    pub list: gtk::ListBox,
    empty: gtk::Label,
    pub profile_btn: gtk::Button,
    footer_avatar: gtk::Box,
    footer_name: gtk::Label,
    footer_handle: gtk::Label,
    pub sign_out_btn: gtk::Button,
}

impl Sidebar {
    pub fn new() -> Self {
        let root = gtk::Box::new(gtk::Orientation::Vertical, 0);
        root.set_width_request(300);

        let header = adw::HeaderBar::new();
        header.set_show_end_title_buttons(false);
        let title = gtk::Label::new(Some("Messages"));
        title.add_css_class("heading");
        header.set_title_widget(Some(&title));
        let new_chat_btn = gtk::ToggleButton::new();
        new_chat_btn.set_icon_name("list-add-symbolic");
        new_chat_btn.set_tooltip_text(Some("New chat"));
        header.pack_end(&new_chat_btn);
        root.append(&header);

        let search_entry = gtk::SearchEntry::new();
        search_entry.set_placeholder_text(Some("Search by username or name"));
        search_entry.set_hexpand(true);
        let search_bar = gtk::SearchBar::new();
        search_bar.set_child(Some(&search_entry));
        search_bar.connect_entry(&search_entry);
        new_chat_btn
            .bind_property("active", &search_bar, "search-mode-enabled")
            .bidirectional()
            .build();
        root.append(&search_bar);

        let results = gtk::ListBox::new();
        results.add_css_class("navigation-sidebar");
        results.set_visible(false);
        root.append(&results);
        let results_empty = gtk::Label::new(Some("No users found"));
        results_empty.add_css_class("dim-label");
        results_empty.set_visible(false);
        root.append(&results_empty);

        let list = gtk::ListBox::new();
        list.add_css_class("navigation-sidebar");
        let scroller = gtk::ScrolledWindow::builder()
            .vexpand(true)
            .hscrollbar_policy(gtk::PolicyType::Never)
            .child(&list)
            .build();
        root.append(&scroller);

        let empty = gtk::Label::new(Some("No conversations yet"));
        empty.add_css_class("dim-label");
        empty.set_margin_top(24);
        empty.set_vexpand(true);
        empty.set_valign(gtk::Align::Start);
        root.append(&empty);

        root.append(&gtk::Separator::new(gtk::Orientation::Horizontal));
        let footer = gtk::Box::new(gtk::Orientation::Horizontal, 8);
        footer.set_margin_top(8);
        footer.set_margin_bottom(8);
        footer.set_margin_start(8);
        footer.set_margin_end(8);

        let profile_content = gtk::Box::new(gtk::Orientation::Horizontal, 8);
        let footer_avatar = gtk::Box::new(gtk::Orientation::Horizontal, 0);
        profile_content.append(&footer_avatar);
        let names = gtk::Box::new(gtk::Orientation::Vertical, 0);
        let footer_name = gtk::Label::new(None);
        footer_name.set_halign(gtk::Align::Start);
        footer_name.add_css_class("heading");
        let footer_handle = gtk::Label::new(None);
        footer_handle.set_halign(gtk::Align::Start);
        footer_handle.add_css_class("dim-label");
        names.append(&footer_name);
        names.append(&footer_handle);
        profile_content.append(&names);

        let profile_btn = gtk::Button::new();
        profile_btn.add_css_class("flat");
        profile_btn.set_hexpand(true);
        profile_btn.set_child(Some(&profile_content));
        profile_btn.set_tooltip_text(Some("Profile"));
        footer.append(&profile_btn);

        let sign_out_btn = gtk::Button::from_icon_name("system-log-out-symbolic");
        sign_out_btn.add_css_class("flat");
        sign_out_btn.set_tooltip_text(Some("Sign out"));
        sign_out_btn.set_valign(gtk::Align::Center);
        footer.append(&sign_out_btn);
        root.append(&footer);

        Self {
            root,
            new_chat_btn,
            search_bar,
            search_entry,
            results,
            results_empty,
            list,
            empty,
            profile_btn,
            footer_avatar,
            footer_name,
            footer_handle,
            sign_out_btn,
        }
    }

    pub fn widget(&self) -> gtk::Widget {
        self.root.clone().upcast()
    }

    pub fn set_profile(&self, profile: Option<&Profile>) {
        while let Some(child) = self.footer_avatar.first_child() {
            self.footer_avatar.remove(&child);
        }
        self.footer_avatar.append(&super::avatar(profile, 36));
        self.footer_name.set_label(profile.map(Profile::display_name).unwrap_or(""));
        self.footer_handle.set_label(&profile.map(Profile::handle).unwrap_or_default());
    }

    /// Rebuild the rows. Row names are conversation ids.
    pub fn set_items(&self, items: &[Conversation], me: &str, selected: Option<&str>) {
        while let Some(child) = self.list.first_child() {
            self.list.remove(&child);
        }
        self.empty.set_visible(items.is_empty());
        let now = Local::now();
        for conv in items {
            let peer = other_participant(conv, me);
            let row = gtk::ListBoxRow::new();
            row.set_widget_name(&conv.id);

            let content = gtk::Box::new(gtk::Orientation::Horizontal, 10);
            content.set_margin_top(6);
            content.set_margin_bottom(6);
            content.append(&avatar_with_presence(peer, 40));

            let text = gtk::Box::new(gtk::Orientation::Vertical, 2);
            text.set_hexpand(true);
            let top = gtk::Box::new(gtk::Orientation::Horizontal, 6);
            let name = gtk::Label::new(Some(peer.map(Profile::display_name).unwrap_or("Unknown")));
            name.add_css_class("heading");
            name.set_halign(gtk::Align::Start);
            name.set_hexpand(true);
            name.set_ellipsize(gtk::pango::EllipsizeMode::End);
            top.append(&name);
            if let Some(ts) = conv.last_message_timestamp {
                let when = gtk::Label::new(Some(&time::relative(ts, &now)));
                when.add_css_class("caption");
                when.add_css_class("dim-label");
                top.append(&when);
            }
            text.append(&top);

            let summary = gtk::Label::new(Some(&preview(conv, me)));
            summary.add_css_class("dim-label");
            summary.set_halign(gtk::Align::Start);
            summary.set_ellipsize(gtk::pango::EllipsizeMode::End);
            text.append(&summary);
            if let Some(caption) = peer.and_then(|p| last_seen_caption(p, &now)) {
                let seen = gtk::Label::new(Some(&caption));
                seen.add_css_class("caption");
                seen.add_css_class("dim-label");
                seen.set_halign(gtk::Align::Start);
                text.append(&seen);
            }
            content.append(&text);

            row.set_child(Some(&content));
            self.list.append(&row);
            if selected == Some(conv.id.as_str()) {
                self.list.select_row(Some(&row));
            }
        }
    }

    /// Show search results. Row names are profile ids.
    pub fn set_results(&self, results: &[Profile], searched: bool) {
        while let Some(child) = self.results.first_child() {
            self.results.remove(&child);
        }
        self.results.set_visible(!results.is_empty());
        self.results_empty.set_visible(searched && results.is_empty());
        for profile in results {
            let row = gtk::ListBoxRow::new();
            row.set_widget_name(&profile.id);
            let content = gtk::Box::new(gtk::Orientation::Horizontal, 10);
            content.set_margin_top(4);
            content.set_margin_bottom(4);
            content.append(&avatar_with_presence(Some(profile), 32));
            let names = gtk::Box::new(gtk::Orientation::Vertical, 0);
            let name = gtk::Label::new(Some(profile.display_name()));
            name.set_halign(gtk::Align::Start);
            let handle = gtk::Label::new(Some(&profile.handle()));
            handle.add_css_class("dim-label");
            handle.add_css_class("caption");
            handle.set_halign(gtk::Align::Start);
            names.append(&name);
            names.append(&handle);
            content.append(&names);
            row.set_child(Some(&content));
            self.results.append(&row);
        }
    }

    pub fn close_search(&self) {
        self.search_entry.set_text("");
        self.new_chat_btn.set_active(false);
        self.set_results(&[], false);
    }
}

/// Avatar with a small green dot when the user is online.
pub fn avatar_with_presence(profile: Option<&Profile>, size: i32) -> gtk::Widget {
    let overlay = gtk::Overlay::new();
    overlay.set_child(Some(&super::avatar(profile, size)));
    if profile.is_some_and(|p| p.is_online) {
        let dot = gtk::Label::new(Some("●"));
        dot.add_css_class("success");
        dot.set_halign(gtk::Align::End);
        dot.set_valign(gtk::Align::End);
        overlay.add_overlay(&dot);
    }
    overlay.upcast()
}
