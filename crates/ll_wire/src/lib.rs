//! LogicLoom Wire
//!
//! Pengine Actor 的 HTTP / WebSocket 入口与对应的 HTTP 客户端。

pub mod client;
pub mod server;

pub use client::PengineClient;
pub use server::{answer, router, serve, ApiError};
