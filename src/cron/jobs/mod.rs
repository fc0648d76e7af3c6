pub mod refresh_balances;
