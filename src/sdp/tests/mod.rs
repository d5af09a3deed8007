mod test_desc;
