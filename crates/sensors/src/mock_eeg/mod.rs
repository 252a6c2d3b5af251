pub mod driver;
pub mod mock_data_generator;
