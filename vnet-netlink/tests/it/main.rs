mod connection;
mod genl;
mod kernel;
