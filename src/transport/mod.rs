pub mod gateway;
pub mod wecom;
