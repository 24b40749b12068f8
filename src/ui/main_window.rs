use std::cell::RefCell;
use std::rc::Rc;

use adw::prelude::*;
use chatapp::api::models::Profile;
use chatapp::chat::ChatEvent;
use chatapp::chat::conversations::{ConversationList, SEARCH_DEBOUNCE, search_term};
use chatapp::chat::session::Phase;
use chatapp::utils::Debouncer;
use gtk4 as gtk;
use tokio::sync::mpsc;

use super::chat_view::ChatView;
use super::profile_view::ProfileView;
use super::sidebar::Sidebar;
use super::{RUNTIME, Shell, run_async_to_main};

/// Signed-in screen: sidebar plus the thread or profile pane.
struct MainWindow {
    shell: Rc<Shell>,
    me: String,
    sidebar: Sidebar,
    content: gtk::Stack,
    chat: Rc<ChatView>,
    profile: Rc<ProfileView>,
    list: RefCell<ConversationList>,
    search: Debouncer,
    search_tx: mpsc::UnboundedSender<(String, Vec<Profile>)>,
}

pub fn page(shell: &Rc<Shell>) -> gtk::Widget {
    let Ok(me) = shell.service.me() else {
        return gtk::Label::new(Some("Not signed in")).upcast();
    };

    let sidebar = Sidebar::new();
    sidebar.set_profile(shell.service.profile().as_ref());

    let content = gtk::Stack::new();
    content.set_hexpand(true);
    let empty = adw::StatusPage::builder()
        .icon_name("chat-message-new-symbolic")
        .title("Welcome to ChatApp")
        .description("Select a conversation or start a new chat")
        .build();
    let empty_page = gtk::Box::new(gtk::Orientation::Vertical, 0);
    empty_page.append(&adw::HeaderBar::new());
    empty.set_vexpand(true);
    empty_page.append(&empty);
    content.add_named(&empty_page, Some("empty"));

    let chat = ChatView::new(shell, &me);
    content.add_named(&chat.widget(), Some("thread"));
    let profile = ProfileView::new(shell);
    content.add_named(&profile.widget(), Some("profile"));
    content.set_visible_child_name("empty");

    let flap = adw::Flap::builder().reveal_flap(true).locked(true).modal(false).build();
    flap.set_flap(Some(&sidebar.widget()));
    flap.set_separator(Some(&gtk::Separator::new(gtk::Orientation::Vertical)));
    flap.set_content(Some(&content));

    let (search_tx, search_rx) = mpsc::unbounded_channel();
    let window = Rc::new(MainWindow {
        shell: shell.clone(),
        me,
        sidebar,
        content,
        chat,
        profile,
        list: RefCell::new(ConversationList::new()),
        search: Debouncer::new(SEARCH_DEBOUNCE, RUNTIME.handle().clone()),
        search_tx,
    });
    window.wire(search_rx);

    window.list.borrow_mut().replace(shell.service.cached_conversations());
    window.render_list();
    window.reload_conversations();
    window.connect_realtime();

    // Everything else holds the window weakly; the page keeps it alive.
    flap.connect_destroy(move |_| {
        let _ = &window;
    });
    flap.upcast()
}

impl MainWindow {
    fn wire(self: &Rc<Self>, mut search_rx: mpsc::UnboundedReceiver<(String, Vec<Profile>)>) {
        {
            let weak = Rc::downgrade(self);
            self.sidebar.list.connect_row_activated(move |_, row| {
                if let Some(window) = weak.upgrade() {
                    window.open_conversation(&row.widget_name());
                }
            });
        }
        {
            let weak = Rc::downgrade(self);
            self.sidebar.results.connect_row_activated(move |_, row| {
                if let Some(window) = weak.upgrade() {
                    window.start_chat(row.widget_name().to_string());
                }
            });
        }
        {
            let weak = Rc::downgrade(self);
            self.sidebar.search_entry.connect_search_changed(move |entry| {
                if let Some(window) = weak.upgrade() {
                    window.on_search(entry.text().to_string());
                }
            });
        }
        {
            let weak = Rc::downgrade(self);
            glib::spawn_future_local(async move {
                while let Some((query, results)) = search_rx.recv().await {
                    let Some(window) = weak.upgrade() else { break };
                    if window.sidebar.search_entry.text() == query {
                        window.sidebar.set_results(&results, true);
                    }
                }
            });
        }
        {
            let weak = Rc::downgrade(self);
            self.sidebar.profile_btn.connect_clicked(move |_| {
                if let Some(window) = weak.upgrade() {
                    window.show_profile();
                }
            });
        }
        {
            let weak = Rc::downgrade(self);
            self.profile.connect_saved(move |profile| {
                if let Some(window) = weak.upgrade() {
                    window.sidebar.set_profile(Some(profile));
                }
            });
        }
        {
            let shell = self.shell.clone();
            self.sidebar.sign_out_btn.connect_clicked(move |btn| {
                btn.set_sensitive(false);
                let service = shell.service.clone();
                let shell = shell.clone();
                let btn = btn.clone();
                run_async_to_main(async move { service.sign_out().await }, move |res| {
                    if let Err(e) = res {
                        btn.set_sensitive(true);
                        shell.report("Sign out failed", &e);
                        return;
                    }
                    shell.show_phase(Phase::SignedOut);
                });
            });
        }
    }

    fn render_list(&self) {
        let list = self.list.borrow();
        let selected = list.selected().map(|c| c.id.clone());
        self.sidebar.set_items(list.items(), &self.me, selected.as_deref());
    }

    fn reload_conversations(self: &Rc<Self>) {
        let service = self.shell.service.clone();
        let weak = Rc::downgrade(self);
        run_async_to_main(async move { service.conversations().await }, move |res| {
            let Some(window) = weak.upgrade() else { return };
            match res {
                Ok(items) => {
                    window.list.borrow_mut().replace(items);
                    window.render_list();
                }
                Err(e) => window.shell.report("Failed to load conversations", &e),
            }
        });
    }

    fn open_conversation(self: &Rc<Self>, id: &str) {
        let previous = self.chat.conversation_id();
        let conv = match self.list.borrow_mut().select(id) {
            Some(conv) => conv.clone(),
            None => return,
        };
        if previous.as_deref() != Some(id) {
            let service = self.shell.service.clone();
            let next = conv.id.clone();
            super::spawn_async(async move {
                if let Some(prev) = previous {
                    service.unwatch_conversation(&prev).await;
                }
                service.watch_conversation(&next).await;
            });
            self.chat.open(&conv);
        }
        self.content.set_visible_child_name("thread");
    }

    fn start_chat(self: &Rc<Self>, other: String) {
        let snapshot = self.list.borrow().clone();
        let service = self.shell.service.clone();
        let weak = Rc::downgrade(self);
        run_async_to_main(
            async move { service.create_conversation(&snapshot, &other).await },
            move |res| {
                let Some(window) = weak.upgrade() else { return };
                match res {
                    Ok((conv, created)) => {
                        let id = conv.id.clone();
                        if created {
                            window.list.borrow_mut().insert_front(conv);
                        }
                        window.sidebar.close_search();
                        window.render_list();
                        window.open_conversation(&id);
                    }
                    Err(e) => window.shell.report("Failed to create conversation", &e),
                }
            },
        );
    }

    fn on_search(&self, query: String) {
        if search_term(&query).is_none() {
            self.search.cancel();
            self.sidebar.set_results(&[], false);
            return;
        }
        let service = self.shell.service.clone();
        let tx = self.search_tx.clone();
        self.search.call(async move {
            match service.search(&query).await {
                Ok(results) => {
                    let _ = tx.send((query, results));
                }
                Err(e) => log::warn!("user search failed: {e}"),
            }
        });
    }

    fn show_profile(&self) {
        self.list.borrow_mut().clear_selection();
        self.sidebar.list.unselect_all();
        self.profile.load(self.shell.service.profile());
        self.content.set_visible_child_name("profile");
    }

    fn connect_realtime(self: &Rc<Self>) {
        let service = self.shell.service.clone();
        let weak = Rc::downgrade(self);
        run_async_to_main(async move { service.connect_realtime().await }, move |res| {
            let Some(window) = weak.upgrade() else { return };
            let mut events = match res {
                Ok(events) => events,
                Err(e) => {
                    window.shell.report("Live updates unavailable", &e);
                    return;
                }
            };
            if let Some(open) = window.chat.conversation_id() {
                let service = window.shell.service.clone();
                super::spawn_async(async move { service.watch_conversation(&open).await });
            }
            drop(window);
            glib::spawn_future_local(async move {
                while let Some(event) = events.recv().await {
                    let Some(window) = weak.upgrade() else { break };
                    window.handle(event);
                }
            });
        });
    }

    fn handle(self: &Rc<Self>, event: ChatEvent) {
        match event {
            ChatEvent::ConversationsChanged => self.reload_conversations(),
            ChatEvent::ProfileChanged(profile) => {
                if self.list.borrow_mut().apply_profile(&profile) {
                    self.render_list();
                }
                self.chat.apply_profile(&profile);
            }
            ChatEvent::MessageArrived(message) => self.chat.apply_message(message),
            ChatEvent::Typing(indicator) => self.chat.apply_typing(&indicator),
            ChatEvent::TypingCleared { conversation_id, user_id } => {
                self.chat.clear_typing(&conversation_id, user_id.as_deref())
            }
            ChatEvent::Connection(up) => log::info!("realtime {}", if up { "connected" } else { "disconnected" }),
            ChatEvent::Error(message) => self.shell.toast(&message),
        }
    }
}
