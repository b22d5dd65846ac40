//! SMSC (now Microchip) Ethernet controllers

pub mod lan911x;
