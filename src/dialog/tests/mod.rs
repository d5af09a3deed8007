mod test_dialog;
