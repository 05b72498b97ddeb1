pub mod hass;
