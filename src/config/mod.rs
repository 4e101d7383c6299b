mod config;

pub use config::{
    AlertConfig, CollectionConfig, Config, Environment, ErrorConfig, Features, RegressionConfig,
};
