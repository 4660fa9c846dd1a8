//! Welcome/goodbye menu sessions under paused time.

mod support;

use codewarden::channels::Channel;
use codewarden::config::WelcomeConfig;
use codewarden::session::{
    custom_id, parse_custom_id, MenuTrigger, SessionState, TemplateField, BUSY_NOTICE,
    EXPIRED_NOTICE, NOT_OPENER_NOTICE, TIMEOUT_NOTICE,
};
use std::time::Duration;
use support::{regular, staff, Harness, CHANNEL};
use uuid::Uuid;

/// Open a menu as `staff()` and return its id.
async fn open_menu(h: &Harness) -> Uuid {
    h.say(staff(), "!welcomemenu").await;
    let sent = h.mem.sent();
    let (channel, post) = sent.last().unwrap();
    assert_eq!(*channel, CHANNEL);
    assert_eq!(post.buttons.len(), 6);
    let (menu_id, _) = parse_custom_id(&post.buttons[0].custom_id).unwrap();
    menu_id
}

fn button(menu_id: Uuid, trigger: MenuTrigger) -> String {
    custom_id(menu_id, trigger)
}

/// Let spawned input tasks observe what the test just did.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

#[tokio::test(start_paused = true)]
async fn menu_post_carries_buttons_and_expiry() {
    let h = Harness::new();
    let menu_id = open_menu(&h).await;

    let sent = h.mem.sent();
    let post = &sent.last().unwrap().1;
    assert_eq!(post.delete_after, Some(Duration::from_secs(300)));
    assert_eq!(
        post.card.as_ref().unwrap().field_value("Channel"),
        Some("Not Set")
    );
    assert_eq!(h.ctx.menus.state(menu_id), Some(SessionState::Idle));
}

#[tokio::test(start_paused = true)]
async fn captured_message_becomes_welcome_template() {
    let h = Harness::new();
    let menu_id = open_menu(&h).await;

    h.click(staff(), &button(menu_id, MenuTrigger::SetWelcomeText))
        .await;
    assert_eq!(
        h.ctx.menus.state(menu_id),
        Some(SessionState::AwaitingInput(TemplateField::Welcome))
    );

    let captured = h.say(staff(), "Hello {user}, enjoy {guild}!").await;
    settle().await;

    assert_eq!(
        h.ctx.store.welcome().welcome_message,
        "Hello {user}, enjoy {guild}!"
    );
    assert!(h.mem.deleted().contains(&captured.message_ref()));
    assert_eq!(h.last_reply().as_deref(), Some("✅ Welcome message updated."));
    assert_eq!(h.ctx.menus.state(menu_id), Some(SessionState::Idle));
}

#[tokio::test(start_paused = true)]
async fn captured_prefixed_text_is_not_routed_as_command() {
    let h = Harness::new();
    let menu_id = open_menu(&h).await;
    h.click(staff(), &button(menu_id, MenuTrigger::SetGoodbyeText))
        .await;
    h.mem.clear();

    h.say(staff(), "!shutdown bye {user}").await;
    settle().await;

    assert_eq!(h.ctx.store.welcome().goodbye_message, "!shutdown bye {user}");
    assert!(h.mem.sent().is_empty());
    assert!(!h.mem.is_closed());
}

#[tokio::test(start_paused = true)]
async fn other_members_messages_are_not_captured() {
    let h = Harness::new();
    let menu_id = open_menu(&h).await;
    h.click(staff(), &button(menu_id, MenuTrigger::SetWelcomeText))
        .await;

    h.say(regular(), "not mine").await;
    settle().await;

    assert_eq!(
        h.ctx.store.welcome().welcome_message,
        WelcomeConfig::default().welcome_message
    );
    assert!(h.ctx.menus.waiters().is_waiting(CHANNEL, 2));
}

#[tokio::test(start_paused = true)]
async fn input_times_out_after_a_minute() {
    let h = Harness::new();
    let menu_id = open_menu(&h).await;
    h.click(staff(), &button(menu_id, MenuTrigger::SetWelcomeText))
        .await;

    tokio::time::sleep(Duration::from_secs(61)).await;

    assert_eq!(h.last_reply().as_deref(), Some(TIMEOUT_NOTICE));
    assert_eq!(h.ctx.store.welcome(), WelcomeConfig::default());
    assert!(!h.ctx.menus.waiters().is_waiting(CHANNEL, 2));

    // A late message is just chat now.
    h.say(staff(), "too late").await;
    settle().await;
    assert_eq!(h.ctx.store.welcome(), WelcomeConfig::default());
}

#[tokio::test(start_paused = true)]
async fn second_prompt_while_waiting_is_busy() {
    let h = Harness::new();
    let menu_id = open_menu(&h).await;
    h.click(staff(), &button(menu_id, MenuTrigger::SetWelcomeText))
        .await;
    h.click(staff(), &button(menu_id, MenuTrigger::SetGoodbyeText))
        .await;

    assert_eq!(h.last_reply().as_deref(), Some(BUSY_NOTICE));
    assert_eq!(
        h.ctx.menus.state(menu_id),
        Some(SessionState::AwaitingInput(TemplateField::Welcome))
    );
}

#[tokio::test(start_paused = true)]
async fn only_the_opener_may_click() {
    let h = Harness::new();
    let menu_id = open_menu(&h).await;

    h.click(regular(), &button(menu_id, MenuTrigger::Toggle)).await;

    assert_eq!(h.last_reply().as_deref(), Some(NOT_OPENER_NOTICE));
    assert!(h.ctx.store.welcome().welcome_enabled);
}

#[tokio::test(start_paused = true)]
async fn toggle_flips_both_flags_together() {
    let h = Harness::new();
    h.ctx
        .store
        .update_welcome(|cfg| cfg.goodbye_enabled = false)
        .unwrap();
    let menu_id = open_menu(&h).await;

    h.click(staff(), &button(menu_id, MenuTrigger::Toggle)).await;
    let cfg = h.ctx.store.welcome();
    assert!(!cfg.welcome_enabled);
    assert!(!cfg.goodbye_enabled);
    assert_eq!(
        h.last_reply().as_deref(),
        Some("🔄 Welcome/Goodbye toggled **OFF**.")
    );

    h.click(staff(), &button(menu_id, MenuTrigger::Toggle)).await;
    let cfg = h.ctx.store.welcome();
    assert!(cfg.welcome_enabled && cfg.goodbye_enabled);
}

#[tokio::test(start_paused = true)]
async fn set_channel_uses_clicked_channel() {
    let h = Harness::new();
    let menu_id = open_menu(&h).await;

    h.click(staff(), &button(menu_id, MenuTrigger::SetChannel))
        .await;

    assert_eq!(h.ctx.store.welcome().welcome_channel_id, Some(CHANNEL));
    assert_eq!(
        h.last_reply().as_deref(),
        Some("✅ Welcome/goodbye channel set to <#20>")
    );
}

#[tokio::test(start_paused = true)]
async fn preview_renders_both_templates() {
    let h = Harness::new();
    let menu_id = open_menu(&h).await;

    h.click(staff(), &button(menu_id, MenuTrigger::Preview)).await;

    let replies = h.mem.replies();
    let reply = replies.last().unwrap();
    assert!(reply.ephemeral);
    let card = reply.card.as_ref().unwrap();
    assert_eq!(
        card.field_value("Welcome"),
        Some("🎉 Welcome <@2> to Night Market!")
    );
}

#[tokio::test(start_paused = true)]
async fn reset_cancels_pending_input_and_restores_defaults() {
    let h = Harness::new();
    h.ctx
        .store
        .update_welcome(|cfg| {
            cfg.welcome_channel_id = Some(99);
            cfg.goodbye_message = "later {user}".into();
        })
        .unwrap();
    let menu_id = open_menu(&h).await;
    h.click(staff(), &button(menu_id, MenuTrigger::SetWelcomeText))
        .await;

    h.click(staff(), &button(menu_id, MenuTrigger::Reset)).await;
    settle().await;
    assert_eq!(h.ctx.store.welcome(), WelcomeConfig::default());
    assert_eq!(h.ctx.menus.state(menu_id), Some(SessionState::Idle));

    // The cancelled input no longer swallows the next message.
    h.say(staff(), "should not be captured").await;
    settle().await;
    assert_eq!(h.ctx.store.welcome(), WelcomeConfig::default());

    // Nor does it report a timeout later.
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(!h
        .mem
        .texts()
        .contains(&TIMEOUT_NOTICE.to_string()));
}

#[tokio::test(start_paused = true)]
async fn clicks_after_five_minutes_are_expired() {
    let h = Harness::new();
    let menu_id = open_menu(&h).await;

    tokio::time::sleep(Duration::from_secs(301)).await;
    h.click(staff(), &button(menu_id, MenuTrigger::Toggle)).await;

    assert_eq!(h.last_reply().as_deref(), Some(EXPIRED_NOTICE));
    assert!(h.ctx.store.welcome().welcome_enabled);
}

#[tokio::test(start_paused = true)]
async fn unknown_menu_id_is_expired() {
    let h = Harness::new();
    h.click(staff(), &button(Uuid::new_v4(), MenuTrigger::Preview))
        .await;
    assert_eq!(h.last_reply().as_deref(), Some(EXPIRED_NOTICE));
}
