pub mod carpus;
