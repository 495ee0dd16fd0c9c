mod handshake;
mod reconcile;
