/*
    spotify-ratings-rs | Rust tool to capture Spotify tokens and sync track ratings.
    Copyright (C) 2025  Israel Alberto Roldan Vega

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use ratings_core::auth::credentials_from_env;
use ratings_core::{
    implicit_grant_url, AppStorage, Config, FileDocumentStore, FileStore, Navigation, Notice,
    Notifier, RatingSystem, RatingsSync, SaveOutcome, Session, SpotifyApi,
};
use std::fs::File;
use std::io::Write;
use std::process;

type CliSession = Session<FileStore, FileDocumentStore, ConsoleNotifier>;

/// Failure the user has already been told about through the notifier.
#[derive(Debug)]
struct AlreadyReported;

impl std::fmt::Display for AlreadyReported {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("already reported")
    }
}

impl std::error::Error for AlreadyReported {}

#[derive(Parser)]
#[command(name = "spotify-ratings")]
#[command(about = "Capture a Spotify token and sync your track ratings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prints the Spotify authorization URL, remembering where to return afterwards
    Login {
        /// Route to come back to after authorizing (e.g. --from playlists)
        #[arg(long)]
        from: Option<String>,
    },
    /// Captures the token from the URL the browser was redirected to
    Callback {
        /// Full callback URL or its `#/access_token=...` fragment
        #[arg(value_name = "URL")]
        location: String,
    },
    /// Runs the startup sequence: token check, then pulls remote ratings into the local cache
    Start {
        /// Optional location to resolve (defaults to no fragment)
        #[arg(value_name = "URL")]
        location: Option<String>,
    },
    /// Shows the stored token, navigation state and local ratings
    Status,
    /// Replaces the stored bearer token by hand
    SetToken {
        #[arg(value_name = "TOKEN")]
        token: String,
    },
    /// Lists your playlists using the stored token
    Playlists,
    /// Rates a track within a playlist in the local cache
    Rate {
        #[arg(value_name = "TRACK_URI")]
        track_uri: String,
        #[arg(value_name = "PLAYLIST_ID")]
        playlist_id: String,
        #[arg(value_name = "RATING", allow_negative_numbers = true)]
        rating: f64,
    },
    /// Lists the locally cached ratings
    Ratings {
        /// Also write them to a JSON file
        #[arg(long)]
        json: Option<String>,
    },
    /// Saves the local ratings to the remote document
    Save,
    /// Loads the remote ratings into the local cache
    Load,
    /// Removes the locally cached ratings
    Clear,
    /// Shows or sets the rating system (THUMBS or STARS5)
    RatingSystem {
        #[arg(value_name = "SYSTEM")]
        system: Option<String>,
    },
}

/// Prints notices the way a toast layer would show them.
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notice: Notice) {
        match notice {
            Notice::Error(_) => eprintln!("{}", notice),
            _ => println!("{}", notice),
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    if dotenv().is_err() {
        // Silently ignore
    }

    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            process::exit(1);
        }
    };
    let session = match open_session(&config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error opening local storage: {:#}", e);
            process::exit(1);
        }
    };

    let result = match &cli.command {
        Commands::Login { from } => handle_login(&session, &config, from.as_deref()),
        Commands::Callback { location } => handle_callback(&session, location),
        Commands::Start { location } => handle_start(&session, location.as_deref()).await,
        Commands::Status => handle_status(&session, &config).await,
        Commands::SetToken { token } => session.set_bearer_token(token).map_err(Into::into),
        Commands::Playlists => handle_playlists(&session, &config).await,
        Commands::Rate {
            track_uri,
            playlist_id,
            rating,
        } => handle_rate(&session, track_uri, playlist_id, *rating),
        Commands::Ratings { json } => handle_ratings(&session, json.as_deref()),
        Commands::Save => handle_save(&session).await,
        Commands::Load => session
            .fetch_ratings()
            .await
            .map(|_| ())
            .map_err(|_| anyhow::Error::new(AlreadyReported)),
        Commands::Clear => session.clear_ratings().map_err(Into::into),
        Commands::RatingSystem { system } => handle_rating_system(&session, system.as_deref()),
    };

    if let Err(e) = result {
        if let Some(message) = failure_message(&e) {
            eprintln!("{}", message);
        }
        process::exit(1);
    }
}

/// What to print for a failed command, or `None` when the notifier already did.
fn failure_message(e: &anyhow::Error) -> Option<String> {
    if e.is::<AlreadyReported>() {
        None
    } else {
        Some(format!("[ERROR] {:#}", e))
    }
}

fn open_session(config: &Config) -> anyhow::Result<CliSession> {
    let store = FileStore::open(&config.storage_path)
        .with_context(|| format!("opening {}", config.storage_path.display()))?;
    let documents = FileDocumentStore::new(&config.documents_dir);
    Ok(Session::new(
        AppStorage::new(store),
        RatingsSync::new(documents, config.location.clone()),
        ConsoleNotifier,
    ))
}

fn authorize_url(config: &Config) -> anyhow::Result<String> {
    let creds = credentials_from_env()?;
    Ok(implicit_grant_url(&creds, &config.oauth())?.to_string())
}

fn handle_login(session: &CliSession, config: &Config, from: Option<&str>) -> anyhow::Result<()> {
    if let Some(route) = from {
        session.tokens().remember_location(route)?;
    }
    let url = authorize_url(config)?;

    println!("Open this URL in your browser to authorize:");
    println!();
    println!("   {}", url);
    println!();
    println!("Then run: ratings-cli callback '<the URL you were redirected to>'");
    Ok(())
}

fn handle_callback(session: &CliSession, location: &str) -> anyhow::Result<()> {
    let outcome = session.tokens().handle_callback(location)?;
    let fragment = &outcome.fragment;

    if fragment.access_token.is_some() {
        println!("Token captured.");
        println!(
            "   Type:       {}",
            fragment.token_type.as_deref().unwrap_or("(unknown)")
        );
        println!(
            "   Expires in: {}",
            fragment
                .expires_in
                .as_deref()
                .map(|s| format!("{}s", s))
                .unwrap_or_else(|| "(unknown)".to_string())
        );
    } else {
        println!("No access token found in URL.");
    }
    print_navigation(&outcome.navigation);
    Ok(())
}

async fn handle_start(session: &CliSession, location: Option<&str>) -> anyhow::Result<()> {
    let outcome = session.startup(location.unwrap_or_default()).await?;
    print_navigation(&outcome.navigation);

    let count = session.storage().ratings()?.map(|r| r.len()).unwrap_or(0);
    println!("Local ratings: {}", count);
    Ok(())
}

fn print_navigation(navigation: &Navigation) {
    match navigation {
        Navigation::Stay => println!("Already authenticated."),
        Navigation::Login => {
            println!("Not authenticated. Run 'ratings-cli login' to authorize.")
        }
        other => {
            if let Some(path) = other.path() {
                println!("Navigate to: {}", path);
            }
        }
    }
}

async fn handle_status(session: &CliSession, config: &Config) -> anyhow::Result<()> {
    let storage = session.storage();
    let token = storage.bearer_token()?;
    let expires_at = storage.token_expires_at()?;
    let authenticated = session.tokens().is_authenticated()?;

    println!("---------------------------------------------------");
    println!("STATUS");
    println!("---------------------------------------------------");
    println!(
        "Bearer Token:   {}",
        match (&token, authenticated) {
            (None, _) => "none".to_string(),
            (Some(t), true) => format!("stored ({})", mask(t)),
            (Some(t), false) => format!("expired ({})", mask(t)),
        }
    );
    if authenticated {
        let user = match SpotifyApi::from_storage(storage)?.current_user_id().await {
            Ok(id) => id,
            Err(e) => {
                log::debug!("Could not fetch current user: {}", e);
                "unavailable (token rejected or offline)".to_string()
            }
        };
        println!("Spotify User:   {}", user);
    }
    println!(
        "Expires At:     {}",
        expires_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string())
    );
    println!(
        "Saved Route:    {}",
        storage.saved_state()?.unwrap_or_else(|| "none".to_string())
    );
    println!("Rating System:  {}", storage.rating_system()?);
    println!(
        "Local Ratings:  {}",
        storage
            .ratings()?
            .map(|r| r.len().to_string())
            .unwrap_or_else(|| "not loaded".to_string())
    );
    println!(
        "Remote Doc:     {}/{} in {}",
        config.location.collection,
        config.location.key,
        config.documents_dir.display()
    );
    println!("---------------------------------------------------");
    Ok(())
}

fn mask(token: &str) -> String {
    let visible: String = token.chars().take(6).collect();
    format!("{}...", visible)
}

async fn handle_playlists(session: &CliSession, config: &Config) -> anyhow::Result<()> {
    let api = SpotifyApi::from_storage(session.storage())?;
    println!("Fetching your playlists...");

    match api.list_playlists().await {
        Ok(playlists) => {
            println!();
            println!(
                "{:<25} | {:<30} | {:<20} | {:<6} | {:<5}",
                "ID", "Name", "Owner", "Tracks", "Collab"
            );
            println!(
                "{:-<25}-+-{:-<30}-+-{:-<20}-+-{:-<6}-+-{:-<5}",
                "", "", "", "", ""
            );

            for pl in playlists {
                let collab = if pl.is_collaborative { "Yes" } else { "No" };
                println!(
                    "{:<25} | {:<30} | {:<20} | {:<6} | {:<5}",
                    pl.id,
                    truncate(&pl.name, 28),
                    truncate(&pl.owner_name, 18),
                    pl.total_tracks,
                    collab
                );
            }
            println!();
            println!("Tip: rate a track with 'ratings-cli rate <TRACK_URI> <PLAYLIST_ID> <RATING>'");
            Ok(())
        }
        Err(e) => {
            session
                .notifier()
                .warn(&format!("Error retrieving playlists: {}", e));
            session.tokens().remember_location("playlists")?;
            session.notifier().info("Re-authorizing Spotify token...");
            match authorize_url(config) {
                Ok(url) => println!("   {}", url),
                Err(e) => eprintln!("[ERROR] Cannot build authorization URL: {:#}", e),
            }
            Err(anyhow::Error::new(AlreadyReported))
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}..", s.chars().take(max).collect::<String>())
    } else {
        s.to_string()
    }
}

fn handle_rate(
    session: &CliSession,
    track_uri: &str,
    playlist_id: &str,
    rating: f64,
) -> anyhow::Result<()> {
    let ratings = session.rate(track_uri, playlist_id, rating)?;
    println!(
        "Rated {} -> {} ({} ratings cached locally, run 'save' to sync)",
        track_uri,
        rating,
        ratings.len()
    );
    Ok(())
}

fn handle_ratings(session: &CliSession, json_path: Option<&str>) -> anyhow::Result<()> {
    let ratings = session.storage().ratings()?.unwrap_or_default();

    if ratings.is_empty() {
        session.notifier().info("No ratings found");
    } else {
        for (i, rating) in ratings.iter().enumerate() {
            println!("{}. {}", i + 1, rating);
        }
    }

    if let Some(path) = json_path {
        let json_content = serde_json::to_string_pretty(&ratings)?;
        let mut file =
            File::create(path).with_context(|| format!("Failed to create file '{}'", path))?;
        file.write_all(json_content.as_bytes())
            .context("Failed to write ratings to file")?;
        println!();
        println!("[SAVED] Ratings saved to: {}", path);
    }
    Ok(())
}

async fn handle_save(session: &CliSession) -> anyhow::Result<()> {
    match session.save_ratings().await {
        Ok(SaveOutcome::Saved { .. }) => {
            log::debug!("Remote ratings document replaced");
            Ok(())
        }
        Ok(SaveOutcome::NothingToSave) => Ok(()),
        Err(_) => Err(anyhow::Error::new(AlreadyReported)),
    }
}

fn handle_rating_system(session: &CliSession, system: Option<&str>) -> anyhow::Result<()> {
    match system {
        None => println!("{}", session.storage().rating_system()?),
        Some(raw) => {
            let system: RatingSystem = raw.parse().map_err(anyhow::Error::msg)?;
            session.set_rating_system(system)?;
        }
    }
    Ok(())
}
