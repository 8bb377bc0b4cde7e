pub mod heal;
