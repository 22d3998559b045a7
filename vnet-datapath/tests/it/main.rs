mod datapath;
mod events;
mod flows;
mod kernel;
mod ports;
