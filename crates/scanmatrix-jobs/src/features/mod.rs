pub mod pokemon_iv;
