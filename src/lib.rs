pub mod api;
pub mod auth;
pub mod bookings;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod identities;
pub mod messages;
pub mod model;
pub mod policy;
pub mod reads;
pub mod reviews;
pub mod rooms;
pub mod ws;
