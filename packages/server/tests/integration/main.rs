mod common;
mod upload;
