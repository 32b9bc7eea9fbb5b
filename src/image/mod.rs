pub mod builder;
pub mod composer;

pub use builder::{BuildSpec, ImageBuilder};
pub use composer::{
    BuildContainer, CommittedImage, ComposeReport, ComposeSession, ComposeState, VmImageComposer,
};
