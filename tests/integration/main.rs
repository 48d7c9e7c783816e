mod common;

mod test_listing;
