mod claim;
mod scenarios;
mod support;
mod sweep;
