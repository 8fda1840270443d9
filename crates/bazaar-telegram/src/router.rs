use std::{sync::Arc, time::Instant};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*, types::BotCommand};

use bazaar_core::{
    catalog::ListingStore,
    config::Config,
    cooldown::CooldownRegistry,
    domain::AccountId,
    market::Marketplace,
    messaging::port::MessagingPort,
    policy::{AuthorizationPolicy, MarketPolicy},
    ports::ChannelPort,
    session::SessionManager,
    utils::AuditLogger,
};

use crate::handlers;
use crate::{TelegramChannels, TelegramMessenger};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub market: Arc<Marketplace>,
    pub messenger: Arc<dyn MessagingPort>,
    pub audit: Arc<AuditLogger>,
}

fn bot_commands() -> Vec<BotCommand> {
    vec![
        BotCommand::new("additem", "Add an item (send as a photo caption)"),
        BotCommand::new("listitems", "List all items"),
        BotCommand::new("search", "Search items by keyword"),
        BotCommand::new("removeitem", "Remove one of your items"),
        BotCommand::new("close", "Close this negotiation channel"),
        BotCommand::new("help", "Show available commands"),
    ]
}

pub async fn run_polling(cfg: Arc<Config>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    if let Ok(me) = bot.get_me().await {
        tracing::info!(username = %me.username(), "bazaar bot started");
    }
    tracing::info!(
        catalog = %cfg.catalog_file.display(),
        images = %cfg.image_dir.display(),
        negotiation_chat = ?cfg.negotiation_chat_id,
        "marketplace configured"
    );
    if cfg.negotiation_chat_id.is_none() {
        tracing::warn!("NEGOTIATION_CHAT_ID is not set; purchase requests will fail");
    }

    // Command registration is cosmetic; the bot works without it.
    if let Err(e) = bot.set_my_commands(bot_commands()).await {
        tracing::warn!(error = %e, "failed to register bot commands");
    }

    let channels: Arc<dyn ChannelPort> = Arc::new(TelegramChannels::new(
        bot.clone(),
        cfg.negotiation_chat_id,
        cfg.log_chat_id,
    ));
    let policy: Arc<dyn AuthorizationPolicy> = Arc::new(MarketPolicy::new(channels.clone()));
    let staff_accounts = cfg
        .staff_users
        .iter()
        .map(|id| AccountId(id.to_string()))
        .collect();
    let sessions = SessionManager::new(
        channels,
        policy.clone(),
        cfg.staff_roles.clone(),
        staff_accounts,
    );
    let market = Arc::new(Marketplace::new(
        ListingStore::new(cfg.catalog_file.clone()),
        CooldownRegistry::default(),
        sessions,
        policy,
    ));

    spawn_sweeper(market.clone(), cfg.cooldown_sweep_interval);

    let messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let state = Arc::new(AppState {
        cfg: cfg.clone(),
        market,
        messenger,
        audit: Arc::new(AuditLogger::new(
            cfg.audit_log_path.clone(),
            cfg.audit_log_json,
        )),
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}

fn spawn_sweeper(market: Arc<Marketplace>, every: std::time::Duration) {
    if every.is_zero() {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let (cooldowns, sessions) = market.sweep(Instant::now()).await;
            if cooldowns + sessions > 0 {
                tracing::debug!(cooldowns, sessions, "swept expired marketplace state");
            }
        }
    });
}
