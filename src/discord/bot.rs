//! Gateway client wiring
//!
//! Builds the serenity client with songbird registered and hands every
//! readiness event to the session manager. The gateway re-emits ready
//! after a resume, which is why the manager's started flag exists.

use std::sync::Arc;

use anyhow::Context as _;
use serenity::all::{Context, EventHandler, GatewayIntents, Ready};
use serenity::async_trait;
use serenity::Client;
use songbird::SerenityInit;
use tokio::sync::OnceCell;
use tracing::info;

use crate::config::Config;
use crate::decode::FfmpegDecoder;
use crate::voice::{JoinFlags, NoListenerPolicy, SessionManager};

use super::driver::{DiscordOpener, DiscordSink};

type Manager = SessionManager<DiscordOpener, FfmpegDecoder>;

struct ReadyHandler {
    config: Config,
    // Built on the first ready event, when the gateway context exists;
    // kept so later ready events reuse the same started flag and sink.
    manager: OnceCell<Arc<Manager>>,
}

impl ReadyHandler {
    async fn manager(&self, ctx: &Context) -> &Arc<Manager> {
        self.manager
            .get_or_init(|| async {
                let songbird = songbird::get(ctx)
                    .await
                    .expect("songbird registered at client init");
                let opener = Arc::new(DiscordOpener::new(songbird, Arc::clone(&ctx.http)));
                let sink = Arc::new(DiscordSink::new(NoListenerPolicy::Continue));
                let decoder = Arc::new(FfmpegDecoder::new(
                    self.config.audio_path.clone(),
                    self.config.debug,
                ));
                Arc::new(SessionManager::new(
                    opener,
                    sink,
                    decoder,
                    self.config.audio_path.clone(),
                    JoinFlags {
                        self_mute: self.config.self_mute,
                        self_deaf: self.config.self_deaf,
                    },
                ))
            })
            .await
    }
}

#[async_trait]
impl EventHandler for ReadyHandler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("Gateway ready as {}", ready.user.name);
        let manager = self.manager(&ctx).await;
        let outcome = manager.join_and_play(self.config.channel_id).await;
        if outcome.playback_started {
            info!("Playback loop launched");
        }
    }
}

/// Build and run the gateway client. Returns only on fatal client errors;
/// authentication failures surface here.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;
    let handler = ReadyHandler {
        config: config.clone(),
        manager: OnceCell::new(),
    };

    let mut client = Client::builder(&config.token, intents)
        .event_handler(handler)
        .register_songbird()
        .await
        .context("failed to build the gateway client")?;

    client
        .start()
        .await
        .context("gateway client stopped with an error")
}
