//! 通用模块：配置、AEAD 封装与安全内存工具。

pub mod aead;
pub mod config;
pub mod utils;
