pub mod health;
pub mod providers;
pub mod route_weather;
