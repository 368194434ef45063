//! Core video cleanup engine.

pub mod coordinates;
pub mod encoder;
pub mod frame;
pub mod inpaint;
pub mod job;
pub mod mask;
pub mod pipeline;
pub mod remux;
pub mod settings;
pub mod source;
pub mod workspace;
