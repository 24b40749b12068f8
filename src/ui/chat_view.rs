use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use chrono::Local;
use gtk4 as gtk;
use gtk4::prelude::*;

use chatapp::api::models::{Conversation, Message, Profile, TypingIndicator};
use chatapp::chat::conversations::{last_seen_caption, other_participant};
use chatapp::chat::thread::{Composer, MessageRow, Thread};
use chatapp::chat::typing::{TYPING_IDLE, TypingSignal, TypingTracker};

use super::{Shell, run_async_to_main, spawn_async};

/// Header, message list and composer of the open conversation.
pub struct ChatView {
    root: gtk::Box,
    shell: Rc<Shell>,
    me: String,
    header_avatar: gtk::Box,
    title: gtk::Label,
    subtitle: gtk::Label,
    scroller: gtk::ScrolledWindow,
    messages: gtk::Box,
    typing_label: gtk::Label,
    entry: gtk::Entry,
    send_btn: gtk::Button,
    thread: RefCell<Option<Thread>>,
    peer: RefCell<Option<Profile>>,
    composer: RefCell<Composer>,
    tracker: RefCell<TypingTracker>,
}

impl ChatView {
    pub fn new(shell: &Rc<Shell>, me: &str) -> Rc<Self> {
        let root = gtk::Box::new(gtk::Orientation::Vertical, 0);

        let header = adw::HeaderBar::new();
        let title_box = gtk::Box::new(gtk::Orientation::Horizontal, 8);
        let header_avatar = gtk::Box::new(gtk::Orientation::Horizontal, 0);
        title_box.append(&header_avatar);
        let titles = gtk::Box::new(gtk::Orientation::Vertical, 0);
        titles.set_valign(gtk::Align::Center);
        let title = gtk::Label::new(None);
        title.add_css_class("heading");
        title.set_halign(gtk::Align::Start);
        let subtitle = gtk::Label::new(None);
        subtitle.add_css_class("caption");
        subtitle.add_css_class("dim-label");
        subtitle.set_halign(gtk::Align::Start);
        titles.append(&title);
        titles.append(&subtitle);
        title_box.append(&titles);
        header.set_title_widget(Some(&title_box));
        root.append(&header);

        let messages = gtk::Box::new(gtk::Orientation::Vertical, 4);
        messages.set_margin_top(12);
        messages.set_margin_bottom(12);
        messages.set_margin_start(12);
        messages.set_margin_end(12);
        let scroller = gtk::ScrolledWindow::builder()
            .vexpand(true)
            .hexpand(true)
            .hscrollbar_policy(gtk::PolicyType::Never)
            .child(&messages)
            .build();
        root.append(&scroller);

        let typing_label = gtk::Label::new(Some("typing..."));
        typing_label.add_css_class("dim-label");
        typing_label.add_css_class("caption");
        typing_label.set_halign(gtk::Align::Start);
        typing_label.set_margin_start(16);
        typing_label.set_visible(false);
        root.append(&typing_label);

        let input_row = gtk::Box::new(gtk::Orientation::Horizontal, 6);
        input_row.set_margin_top(6);
        input_row.set_margin_bottom(8);
        input_row.set_margin_start(8);
        input_row.set_margin_end(8);
        let entry = gtk::Entry::new();
        entry.set_hexpand(true);
        entry.set_placeholder_text(Some("Type a message..."));
        let send_btn = gtk::Button::from_icon_name("mail-send-symbolic");
        send_btn.add_css_class("suggested-action");
        send_btn.set_sensitive(false);
        input_row.append(&entry);
        input_row.append(&send_btn);
        root.append(&input_row);

        let view = Rc::new(Self {
            root,
            shell: shell.clone(),
            me: me.to_string(),
            header_avatar,
            title,
            subtitle,
            scroller,
            messages,
            typing_label,
            entry,
            send_btn,
            thread: RefCell::new(None),
            peer: RefCell::new(None),
            composer: RefCell::new(Composer::default()),
            tracker: RefCell::new(TypingTracker::new()),
        });

        {
            let weak = Rc::downgrade(&view);
            view.entry.connect_changed(move |entry| {
                if let Some(view) = weak.upgrade() {
                    view.on_input(&entry.text());
                }
            });
        }
        {
            let weak = Rc::downgrade(&view);
            view.entry.connect_activate(move |_| {
                if let Some(view) = weak.upgrade() {
                    view.send();
                }
            });
        }
        {
            let weak = Rc::downgrade(&view);
            view.send_btn.connect_clicked(move |_| {
                if let Some(view) = weak.upgrade() {
                    view.send();
                }
            });
        }
        view
    }

    pub fn widget(&self) -> gtk::Widget {
        self.root.clone().upcast()
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.thread.borrow().as_ref().map(|t| t.conversation_id().to_string())
    }

    /// Switch to `conv`: reset local state and load its messages.
    pub fn open(self: &Rc<Self>, conv: &Conversation) {
        self.stop_typing();
        *self.thread.borrow_mut() = Some(Thread::new(&conv.id, &self.me));
        *self.peer.borrow_mut() = other_participant(conv, &self.me).cloned();
        *self.composer.borrow_mut() = Composer::default();
        *self.tracker.borrow_mut() = TypingTracker::new();
        self.entry.set_text("");
        self.render_header();
        self.render();

        let service = self.shell.service.clone();
        let conv_id = conv.id.clone();
        let weak = Rc::downgrade(self);
        run_async_to_main(
            async move {
                let messages = service.messages(&conv_id).await;
                (conv_id, messages)
            },
            move |(conv_id, res)| {
                let Some(view) = weak.upgrade() else { return };
                match res {
                    Ok(messages) => {
                        let mut thread = view.thread.borrow_mut();
                        match thread.as_mut() {
                            Some(t) if t.conversation_id() == conv_id => t.load(messages),
                            _ => return,
                        }
                        drop(thread);
                        view.render();
                    }
                    Err(e) => view.shell.report("Failed to load messages", &e),
                }
            },
        );
    }

    pub fn apply_message(&self, message: Message) {
        let inserted = match self.thread.borrow_mut().as_mut() {
            Some(thread) => thread.apply_insert(message),
            None => false,
        };
        if inserted {
            self.render();
        }
    }

    pub fn apply_typing(&self, indicator: &TypingIndicator) {
        let typing = self
            .thread
            .borrow_mut()
            .as_mut()
            .and_then(|t| t.apply_typing(indicator).then(|| t.peer_typing()));
        if let Some(typing) = typing {
            self.typing_label.set_visible(typing);
        }
    }

    pub fn clear_typing(&self, conversation_id: &str, user_id: Option<&str>) {
        let cleared = self
            .thread
            .borrow_mut()
            .as_mut()
            .is_some_and(|t| t.clear_typing(conversation_id, user_id));
        if cleared {
            self.typing_label.set_visible(false);
        }
    }

    pub fn apply_profile(&self, profile: &Profile) {
        let changed = match self.peer.borrow_mut().as_mut() {
            Some(peer) if peer.id == profile.id => {
                peer.merge_from(profile);
                true
            }
            _ => false,
        };
        if changed {
            self.render_header();
        }
    }

    fn render_header(&self) {
        let peer = self.peer.borrow();
        while let Some(child) = self.header_avatar.first_child() {
            self.header_avatar.remove(&child);
        }
        self.header_avatar.append(&super::sidebar::avatar_with_presence(peer.as_ref(), 32));
        self.title.set_label(peer.as_ref().map(Profile::display_name).unwrap_or("Unknown"));
        let status = match peer.as_ref() {
            Some(p) if p.is_online => "Online".to_string(),
            Some(p) => last_seen_caption(p, &Local::now()).unwrap_or_default(),
            None => String::new(),
        };
        self.subtitle.set_label(&status);
        self.typing_label.set_visible(false);
    }

    fn render(&self) {
        while let Some(child) = self.messages.first_child() {
            self.messages.remove(&child);
        }
        let thread = self.thread.borrow();
        let Some(thread) = thread.as_ref() else { return };
        let peer = self.peer.borrow();

        if thread.messages().is_empty() {
            let empty = gtk::Label::new(Some("No messages yet. Say hello!"));
            empty.add_css_class("dim-label");
            empty.set_vexpand(true);
            self.messages.append(&empty);
            return;
        }

        let now = Local::now();
        for row in thread.layout(&now) {
            let message = &thread.messages()[row.index];
            if let Some(label) = &row.date_separator {
                let sep = gtk::Label::new(Some(label));
                sep.add_css_class("caption");
                sep.add_css_class("dim-label");
                sep.set_margin_top(12);
                sep.set_margin_bottom(6);
                self.messages.append(&sep);
            }
            let sender = message.sender.as_ref().or(peer.as_ref());
            self.messages.append(&bubble(message, &row, sender));
        }

        let adj = self.scroller.vadjustment();
        glib::idle_add_local_once(move || adj.set_value(adj.upper()));
    }

    fn on_input(self: &Rc<Self>, text: &str) {
        self.send_btn.set_sensitive(!text.trim().is_empty() && !self.composer.borrow().is_sending());
        let signal = self.tracker.borrow_mut().on_input(text, Instant::now());
        self.push_typing(signal);

        let weak = Rc::downgrade(self);
        glib::timeout_add_local_once(TYPING_IDLE, move || {
            if let Some(view) = weak.upgrade() {
                let signal = view.tracker.borrow_mut().poll(Instant::now());
                view.push_typing(signal);
            }
        });
    }

    fn stop_typing(&self) {
        let signal = self.tracker.borrow_mut().on_send();
        self.push_typing(signal);
    }

    fn push_typing(&self, signal: Option<TypingSignal>) {
        let (Some(signal), Some(conv_id)) = (signal, self.conversation_id()) else { return };
        let service = self.shell.service.clone();
        spawn_async(async move {
            if let Err(e) = service.set_typing(&conv_id, signal.is_typing()).await {
                log::debug!("typing update failed: {e}");
            }
        });
    }

    fn send(self: &Rc<Self>) {
        let Some(conv_id) = self.conversation_id() else { return };
        let content = {
            let mut composer = self.composer.borrow_mut();
            composer.text = self.entry.text().to_string();
            composer.begin_send()
        };
        let Some(content) = content else { return };

        let stop = self.tracker.borrow_mut().on_send();
        self.entry.set_text("");
        self.send_btn.set_sensitive(false);

        let service = self.shell.service.clone();
        let weak = Rc::downgrade(self);
        let body = content.clone();
        run_async_to_main(
            async move {
                if stop.is_some() {
                    if let Err(e) = service.set_typing(&conv_id, false).await {
                        log::debug!("typing update failed: {e}");
                    }
                }
                service.send_message(&conv_id, &body).await
            },
            move |res| {
                let Some(view) = weak.upgrade() else { return };
                let ok = res.is_ok();
                view.composer.borrow_mut().finish_send(content, ok);
                if let Err(e) = res {
                    let restored = view.composer.borrow().text.clone();
                    view.tracker.borrow_mut().set_muted(true);
                    view.entry.set_text(&restored);
                    view.tracker.borrow_mut().set_muted(false);
                    view.shell.report("Failed to send message", &e);
                }
            },
        );
    }
}

fn bubble(message: &Message, row: &MessageRow, sender: Option<&Profile>) -> gtk::Widget {
    let line = gtk::Box::new(gtk::Orientation::Horizontal, 8);
    line.set_halign(if row.is_own { gtk::Align::End } else { gtk::Align::Start });
    if !row.consecutive {
        line.set_margin_top(6);
    }

    if !row.is_own {
        if row.show_avatar {
            let avatar = super::avatar(sender, 28);
            avatar.set_valign(gtk::Align::End);
            line.append(&avatar);
        } else {
            let spacer = gtk::Box::new(gtk::Orientation::Horizontal, 0);
            spacer.set_size_request(28, -1);
            line.append(&spacer);
        }
    }

    let body = gtk::Box::new(gtk::Orientation::Vertical, 2);
    body.add_css_class("card");
    body.set_margin_start(2);
    body.set_margin_end(2);
    if row.show_sender_name {
        let name = gtk::Label::new(Some(sender.map(Profile::display_name).unwrap_or("")));
        name.add_css_class("caption-heading");
        name.set_halign(gtk::Align::Start);
        name.set_margin_start(10);
        name.set_margin_top(6);
        body.append(&name);
    }

    let text = gtk::Label::new(Some(message.text()));
    text.set_wrap(true);
    text.set_wrap_mode(gtk::pango::WrapMode::WordChar);
    text.set_max_width_chars(60);
    text.set_selectable(true);
    text.set_xalign(0.0);
    text.set_margin_start(10);
    text.set_margin_end(10);
    text.set_margin_top(6);
    body.append(&text);

    let meta = if row.is_own {
        format!("{} {}", row.time_label, if row.read { "✓✓" } else { "✓" })
    } else {
        row.time_label.clone()
    };
    let meta = gtk::Label::new(Some(&meta));
    meta.add_css_class("caption");
    meta.add_css_class("dim-label");
    meta.set_halign(gtk::Align::End);
    meta.set_margin_start(10);
    meta.set_margin_end(10);
    meta.set_margin_bottom(6);
    body.append(&meta);

    line.append(&body);
    line.upcast()
}
