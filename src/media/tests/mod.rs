mod test_negotiate;
mod test_porter;
