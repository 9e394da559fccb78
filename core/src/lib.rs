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

pub mod auth;
pub mod config;
pub mod documents;
pub mod models;
pub mod notify;
pub mod session;
pub mod spotify;
pub mod storage;
pub mod sync;

// Re-export key items for convenience
pub use auth::{implicit_grant_url, Navigation, TokenFragment, TokenLifecycle};
pub use config::Config;
pub use documents::{DocumentStore, FileDocumentStore, MemoryDocumentStore};
pub use models::{Rating, RatingSystem, RatingsDocument};
pub use notify::{Notice, Notifier};
pub use session::Session;
pub use spotify::SpotifyApi;
pub use storage::{AppStorage, FileStore, KeyValueStore, MemoryStore};
pub use sync::{DocumentLocation, RatingsSync, SaveOutcome};
